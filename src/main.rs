use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use log::info;

use icon_forge::config::Config;
use icon_forge::http::{admin, convert, formats, health};
use icon_forge::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = Config::from_env();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(Config::log_level()));

    let port = config.port;
    let cors_origin = config.cors_origin.clone();

    let app_state = AppState::new(config)
        .await
        .expect("failed to initialize application state");

    info!("Starting icon-forge service on port {port}");

    let shutdown_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = if cors_origin == "*" {
            Cors::default()
                .allow_any_origin()
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    "Origin",
                    "X-Requested-With",
                    "Content-Type",
                    "Accept",
                    "X-Admin-Secret",
                ])
                .max_age(3600)
        } else {
            Cors::default()
                .allowed_origin(&cors_origin)
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    "Origin",
                    "X-Requested-With",
                    "Content-Type",
                    "Accept",
                    "X-Admin-Secret",
                ])
                .max_age(3600)
        };

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .route("/api/v1/health", web::get().to(health::health_check))
            .route("/api/v1/errors", web::get().to(health::list_errors))
            .route("/api/v1/formats", web::get().to(formats::list_formats))
            .route("/api/v1/convert", web::post().to(convert::convert))
            .route("/api/v1/admin/stats", web::get().to(admin::stats))
            .route(
                "/api/v1/admin/stats/failures",
                web::delete().to(admin::delete_failures),
            )
    })
    .bind(format!("0.0.0.0:{port}"))?
    .run();

    let result = server.await;

    // Drain the queue and let in-flight jobs finish within the grace period
    // before the process exits, matching the shutdown contract in C3/C4.
    shutdown_state.shutdown().await;
    result
}
