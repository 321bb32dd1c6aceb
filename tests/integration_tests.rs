use actix_web::{test, web, App};

use icon_forge::config::Config;
use icon_forge::http::{admin, convert, health};
use icon_forge::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        admin_password: "topsecret".to_string(),
        cors_origin: "*".to_string(),
        queue_max: 10,
        job_timeout_secs: 10,
        worker_count: 2,
        rate_limit_window_secs: 3600,
        rate_limit_max: 60,
        rate_limit_sweep_secs: 300,
        max_upload_bytes: 10 * 1024 * 1024,
        shutdown_grace_secs: 1,
    }
}

async fn build_state(config: Config) -> AppState {
    AppState::new(config).await.unwrap()
}

fn multipart_body(boundary: &str, filename: &str, file_bytes: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

const RED_SQUARE_SVG: &[u8] =
    br#"<svg viewBox="0 0 100 100"><rect width="100" height="100" fill="red"/></svg>"#;

const SMART_BG_SVG: &[u8] = br#"<svg viewBox="0 0 100 100">
<rect width="100" height="100" fill="#fff"/>
<circle cx="50" cy="50" r="20" fill="blue"/>
</svg>"#;

#[actix_rt::test]
async fn health_check_reports_ok() {
    let state = build_state(test_config()).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .route("/api/v1/health", web::get().to(health::health_check)),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[actix_rt::test]
async fn ico_happy_path_returns_six_embedded_sizes() {
    let state = build_state(test_config()).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .route("/api/v1/convert", web::post().to(convert::convert)),
    )
    .await;

    let boundary = "X-BOUNDARY-1";
    let body = multipart_body(
        boundary,
        "icon.svg",
        RED_SQUARE_SVG,
        &[("format", "ico"), ("scale", "100"), ("cornerRadius", "0")],
    );
    let req = test::TestRequest::post()
        .uri("/api/v1/convert")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        ))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "image/x-icon"
    );
    assert!(resp.headers().contains_key("x-processing-time-ms"));

    let bytes = test::read_body(resp).await;
    // ICONDIR header: reserved=0, type=1, count=6.
    assert_eq!(&bytes[0..2], &0u16.to_le_bytes());
    assert_eq!(&bytes[2..4], &1u16.to_le_bytes());
    assert_eq!(&bytes[4..6], &6u16.to_le_bytes());
}

#[actix_rt::test]
async fn smart_background_removal_yields_transparent_corners() {
    let state = build_state(test_config()).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .route("/api/v1/convert", web::post().to(convert::convert)),
    )
    .await;

    let boundary = "X-BOUNDARY-2";
    let body = multipart_body(
        boundary,
        "icon.svg",
        SMART_BG_SVG,
        &[
            ("format", "png"),
            ("backgroundRemovalMode", "smart"),
            ("outputSize", "256"),
        ],
    );
    let req = test::TestRequest::post()
        .uri("/api/v1/convert")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        ))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let bytes = test::read_body(resp).await;
    let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (256, 256));
    assert_eq!(decoded.get_pixel(0, 0).0[3], 0);
    assert_eq!(decoded.get_pixel(255, 255).0[3], 0);
}

#[actix_rt::test]
async fn malformed_svg_is_rejected_as_bad_input() {
    let state = build_state(test_config()).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .route("/api/v1/convert", web::post().to(convert::convert)),
    )
    .await;

    let boundary = "X-BOUNDARY-3";
    let body = multipart_body(boundary, "icon.svg", b"not an svg at all", &[]);
    let req = test::TestRequest::post()
        .uri("/api/v1/convert")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        ))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn queue_full_returns_503() {
    let mut config = test_config();
    config.queue_max = 1;
    config.worker_count = 1;
    let state = build_state(config).await;

    // Occupy the only queue slot directly so the next HTTP submission sees Busy.
    let inputs = icon_forge::job::JobInputs {
        source_type: icon_forge::job::SourceType::Svg,
        source_bytes: RED_SQUARE_SVG.to_vec(),
        original_filename: "hold.svg".to_string(),
        format: icon_forge::job::OutputFormat::Ico,
        scale_percent: 100.0,
        corner_radius_percent: 0.0,
        bg_removal: icon_forge::job::BgRemoval::None,
        png_options: icon_forge::job::PngOptions {
            size: 512,
            dpi: 72,
            colorspace: icon_forge::job::Colorspace::Srgb,
            color_depth: icon_forge::job::ColorDepth::ThirtyTwo,
        },
        source_dimensions: None,
    };
    let _held = state
        .queue
        .enqueue(inputs, std::time::Duration::from_secs(30))
        .unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .route("/api/v1/convert", web::post().to(convert::convert)),
    )
    .await;

    let boundary = "X-BOUNDARY-4";
    let body = multipart_body(boundary, "icon.svg", RED_SQUARE_SVG, &[]);
    let req = test::TestRequest::post()
        .uri("/api/v1/convert")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        ))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
}

#[actix_rt::test]
async fn rate_limit_blocks_after_configured_max() {
    let mut config = test_config();
    config.rate_limit_max = 2;
    config.rate_limit_window_secs = 3600;
    let state = build_state(config).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .route("/api/v1/convert", web::post().to(convert::convert)),
    )
    .await;

    let mut last_status = 0u16;
    for i in 0..4 {
        let boundary = format!("X-BOUNDARY-RL-{i}");
        let body = multipart_body(&boundary, "icon.svg", RED_SQUARE_SVG, &[]);
        let req = test::TestRequest::post()
            .uri("/api/v1/convert")
            .peer_addr("127.0.0.1:9999".parse().unwrap())
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        last_status = resp.status().as_u16();
        if last_status == 429 {
            assert!(resp.headers().contains_key("retry-after"));
            break;
        }
    }
    assert_eq!(last_status, 429);
}

#[actix_rt::test]
async fn admin_stats_requires_matching_secret() {
    let state = build_state(test_config()).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .route("/api/v1/admin/stats", web::get().to(admin::stats)),
    )
    .await;

    let unauthorized = test::TestRequest::get()
        .uri("/api/v1/admin/stats")
        .to_request();
    let resp = test::call_service(&app, unauthorized).await;
    assert_eq!(resp.status(), 401);

    let authorized = test::TestRequest::get()
        .uri("/api/v1/admin/stats")
        .insert_header(("X-Admin-Secret", "topsecret"))
        .to_request();
    let resp = test::call_service(&app, authorized).await;
    assert_eq!(resp.status(), 200);
}
