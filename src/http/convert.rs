use std::collections::HashMap;
use std::time::Instant;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use futures_util::TryStreamExt;

use crate::error::{AppError, AppResult};
use crate::job::{
    BgRemoval, ColorDepth, Colorspace, JobInputs, OutputFormat, PngOptions, SourceDimensions,
    SourceType,
};
use crate::metrics::ConversionMetric;
use crate::queue::JobOutcome;
use crate::{rate_limit, worker, AppState};

const DEFAULT_FORMAT: &str = "ico";
const DEFAULT_SCALE: f64 = 100.0;
const DEFAULT_CORNER_RADIUS: f64 = 0.0;
const DEFAULT_BG_MODE: &str = "none";
const DEFAULT_OUTPUT_SIZE: u32 = 512;
const DEFAULT_PNG_DPI: u32 = 72;
const DEFAULT_PNG_COLORSPACE: &str = "srgb";
const DEFAULT_PNG_COLOR_DEPTH: u16 = 32;
const PROCESSING_TIME_HEADER: &str = "x-processing-time-ms";

struct RawUpload {
    file_bytes: Option<Vec<u8>>,
    original_filename: String,
    fields: HashMap<String, String>,
}

/// `POST /api/v1/convert`. Every response, success or error, carries
/// `X-Processing-Time-Ms`; errors raised anywhere in `convert_inner` via `?`
/// are caught here so the header still gets attached.
pub async fn convert(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> HttpResponse {
    let start = Instant::now();
    match convert_inner(req, payload, state, start).await {
        Ok(resp) => resp,
        Err(err) => {
            let elapsed_ms = start.elapsed().as_millis() as i64;
            attach_processing_time(err.error_response(), elapsed_ms)
        }
    }
}

fn attach_processing_time(mut resp: HttpResponse, elapsed_ms: i64) -> HttpResponse {
    if let Ok(value) = actix_web::http::header::HeaderValue::from_str(&elapsed_ms.to_string()) {
        resp.headers_mut().insert(
            actix_web::http::header::HeaderName::from_static(PROCESSING_TIME_HEADER),
            value,
        );
    }
    resp
}

/// Order of operations matches the HTTP surface contract: rate-limit gate,
/// size/presence check, source-type detection, sanitizer/signature check,
/// option validation, then submission to the worker pool.
async fn convert_inner(
    req: HttpRequest,
    mut payload: Multipart,
    state: web::Data<AppState>,
    start: Instant,
) -> AppResult<HttpResponse> {
    let client_ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();

    let rate_outcome = state
        .rate_limiter
        .check_and_increment(&client_ip, chrono::Utc::now().timestamp())
        .await?;
    if rate_outcome.blocked {
        return Err(AppError::RateLimited {
            retry_after_secs: rate_outcome.time_to_expire_secs as u64,
        });
    }

    let raw = read_multipart(&mut payload, state.config.max_upload_bytes).await?;
    let file_bytes = raw
        .file_bytes
        .ok_or_else(|| AppError::bad_input("a 'file' part is required"))?;

    let source_type = detect_source_type(&raw.original_filename)?;
    let sanitized = crate::sanitizer::sanitize(&file_bytes, source_type)?;
    let inputs = build_job_inputs(
        source_type,
        sanitized.safe_bytes,
        raw.original_filename,
        &raw.fields,
    )?;
    inputs.validate()?;

    let identity_hash = rate_limit::identity_hash(&client_ip);
    let inputs_for_job = inputs.clone();
    let (_job_id, rx) = worker::submit(&state.pool, inputs_for_job, state.job_timeout())?;

    let outcome = rx.await.unwrap_or(JobOutcome::ShuttingDown);
    let elapsed_ms = start.elapsed().as_millis() as i64;
    let now = chrono::Utc::now().timestamp();

    match outcome {
        JobOutcome::Completed { mut artifacts, worker_id } => {
            let artifact = artifacts
                .pop()
                .ok_or(AppError::InternalServerError)?;
            state.metrics.record_async(ConversionMetric::from_job(
                identity_hash,
                &inputs,
                Some(artifact.bytes.len()),
                elapsed_ms,
                true,
                None,
                now,
                worker_id.map(|w| w as i64),
            ));
            Ok(attach_processing_time(
                HttpResponse::Ok()
                    .content_type(artifact.mime_type)
                    .append_header((
                        "Content-Disposition",
                        format!("attachment; filename=\"{}\"", artifact.filename),
                    ))
                    .body(artifact.bytes),
                elapsed_ms,
            ))
        }
        JobOutcome::Failed { error: err, worker_id } => {
            state.metrics.record_async(ConversionMetric::from_job(
                identity_hash,
                &inputs,
                None,
                elapsed_ms,
                false,
                Some(err.to_string()),
                now,
                worker_id.map(|w| w as i64),
            ));
            Err(err)
        }
        JobOutcome::TimedOut => {
            state.metrics.record_async(ConversionMetric::from_job(
                identity_hash,
                &inputs,
                None,
                elapsed_ms,
                false,
                Some("timed out".to_string()),
                now,
                None,
            ));
            Err(AppError::Timeout)
        }
        JobOutcome::ShuttingDown => Err(AppError::ShuttingDown),
    }
}

async fn read_multipart(payload: &mut Multipart, max_bytes: usize) -> AppResult<RawUpload> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_filename = String::from("icon");
    let mut fields = HashMap::new();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::bad_input(format!("malformed multipart body: {e}")))?
    {
        let content_disposition = field.content_disposition().cloned();
        let field_name = content_disposition
            .as_ref()
            .and_then(|cd| cd.get_name())
            .unwrap_or("")
            .to_string();

        if field_name == "file" {
            if let Some(name) = content_disposition.as_ref().and_then(|cd| cd.get_filename()) {
                original_filename = name.to_string();
            }
            let mut buf = Vec::new();
            while let Some(chunk) = field
                .try_next()
                .await
                .map_err(|e| AppError::bad_input(format!("malformed multipart body: {e}")))?
            {
                buf.extend_from_slice(&chunk);
                if buf.len() > max_bytes {
                    return Err(AppError::bad_input(format!(
                        "file exceeds the {max_bytes} byte upload limit"
                    )));
                }
            }
            file_bytes = Some(buf);
        } else {
            let mut buf = Vec::new();
            while let Some(chunk) = field
                .try_next()
                .await
                .map_err(|e| AppError::bad_input(format!("malformed multipart body: {e}")))?
            {
                buf.extend_from_slice(&chunk);
            }
            if let Ok(text) = String::from_utf8(buf) {
                fields.insert(field_name, text);
            }
        }
    }

    Ok(RawUpload {
        file_bytes,
        original_filename,
        fields,
    })
}

fn detect_source_type(filename: &str) -> AppResult<SourceType> {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".svg") {
        Ok(SourceType::Svg)
    } else if lower.ends_with(".png") {
        Ok(SourceType::Png)
    } else {
        Err(AppError::bad_input(
            "file must have a .svg or .png extension",
        ))
    }
}

fn field<'a>(fields: &'a HashMap<String, String>, key: &str, default: &'a str) -> &'a str {
    fields.get(key).map(|s| s.as_str()).unwrap_or(default)
}

fn parse_f64(fields: &HashMap<String, String>, key: &str, default: f64) -> AppResult<f64> {
    match fields.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::bad_input(format!("{key} must be a number, got '{raw}'"))),
    }
}

fn parse_u32(fields: &HashMap<String, String>, key: &str, default: u32) -> AppResult<u32> {
    match fields.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::bad_input(format!("{key} must be an integer, got '{raw}'"))),
    }
}

fn build_job_inputs(
    source_type: SourceType,
    source_bytes: Vec<u8>,
    original_filename: String,
    fields: &HashMap<String, String>,
) -> AppResult<JobInputs> {
    let format = OutputFormat::parse(field(fields, "format", DEFAULT_FORMAT))?;
    let scale_percent = parse_f64(fields, "scale", DEFAULT_SCALE)?;
    let corner_radius_percent = parse_f64(fields, "cornerRadius", DEFAULT_CORNER_RADIUS)?;
    let bg_removal = BgRemoval::parse(
        field(fields, "backgroundRemovalMode", DEFAULT_BG_MODE),
        fields.get("backgroundRemovalColor").map(|s| s.as_str()),
    )?;
    let output_size = parse_u32(fields, "outputSize", DEFAULT_OUTPUT_SIZE)?;
    let png_dpi = parse_u32(fields, "pngDpi", DEFAULT_PNG_DPI)?;
    let colorspace = Colorspace::parse(field(fields, "pngColorspace", DEFAULT_PNG_COLORSPACE))?;
    let color_depth_raw = parse_u32(fields, "pngColorDepth", DEFAULT_PNG_COLOR_DEPTH as u32)?;
    let color_depth = ColorDepth::parse(color_depth_raw as u16)?;

    let source_dimensions = match source_type {
        SourceType::Png => {
            let width = fields
                .get("sourceWidth")
                .ok_or_else(|| AppError::bad_input("sourceWidth is required for PNG sources"))?
                .parse::<u32>()
                .map_err(|_| AppError::bad_input("sourceWidth must be a positive integer"))?;
            let height = fields
                .get("sourceHeight")
                .ok_or_else(|| AppError::bad_input("sourceHeight is required for PNG sources"))?
                .parse::<u32>()
                .map_err(|_| AppError::bad_input("sourceHeight must be a positive integer"))?;
            Some(SourceDimensions { width, height })
        }
        SourceType::Svg => None,
    };

    Ok(JobInputs {
        source_type,
        source_bytes,
        original_filename,
        format,
        scale_percent,
        corner_radius_percent,
        bg_removal,
        png_options: PngOptions {
            size: output_size,
            dpi: png_dpi,
            colorspace,
            color_depth,
        },
        source_dimensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_source_type_by_extension() {
        assert_eq!(detect_source_type("icon.svg").unwrap(), SourceType::Svg);
        assert_eq!(detect_source_type("icon.PNG").unwrap(), SourceType::Png);
        assert!(detect_source_type("icon.gif").is_err());
    }

    #[test]
    fn build_job_inputs_applies_defaults() {
        let fields = HashMap::new();
        let inputs =
            build_job_inputs(SourceType::Svg, b"<svg/>".to_vec(), "x.svg".into(), &fields)
                .unwrap();
        assert_eq!(inputs.format, OutputFormat::Ico);
        assert_eq!(inputs.scale_percent, DEFAULT_SCALE);
        assert_eq!(inputs.png_options.size, DEFAULT_OUTPUT_SIZE);
    }

    #[test]
    fn build_job_inputs_requires_png_dimensions() {
        let fields = HashMap::new();
        let result =
            build_job_inputs(SourceType::Png, vec![], "x.png".into(), &fields);
        assert!(result.is_err());
    }
}
