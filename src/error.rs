use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use strum::EnumIter;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, EnumIter, thiserror::Error)]
pub enum AppError {
    #[error("VAL_001: Invalid input - {detail}")]
    BadInput { detail: String },

    #[error("SRC_001: Invalid source - The file is not a valid SVG/PNG")]
    InvalidSource,

    #[error("SEC_001: Rejected for security reasons")]
    SecurityRejected,

    #[error("SRC_002: Source too small - {detail}")]
    SourceTooSmall { detail: String },

    #[error("IMG_001: Render failed - {reason}")]
    RenderFailed { reason: String },

    #[error("IMG_002: Encode failed - {reason}")]
    EncodeFailed { reason: String },

    #[error("IMG_003: Source too complex to render - {reason}")]
    TooComplex { reason: String },

    #[error("SYS_001: Server is busy. Please try again later")]
    Busy,

    #[error("SYS_002: Processing took too long")]
    Timeout,

    #[error("SYS_003: Unexpected error; please retry")]
    WorkerCrashed,

    #[error("SYS_004: Service is shutting down")]
    ShuttingDown,

    #[error("RATE_001: Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("AUTH_001: Invalid admin password")]
    Unauthorized,

    #[error("SYS_005: An unexpected internal error occurred")]
    InternalServerError,
}

#[derive(Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    error_type: String,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: String,
    #[serde(rename = "howToFix")]
    how_to_fix: String,
}

impl AppError {
    pub fn bad_input(detail: impl Into<String>) -> Self {
        AppError::BadInput {
            detail: detail.into(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::BadInput { .. } => "VAL_001",
            AppError::InvalidSource => "SRC_001",
            AppError::SecurityRejected => "SEC_001",
            AppError::SourceTooSmall { .. } => "SRC_002",
            AppError::RenderFailed { .. } => "IMG_001",
            AppError::EncodeFailed { .. } => "IMG_002",
            AppError::TooComplex { .. } => "IMG_003",
            AppError::Busy => "SYS_001",
            AppError::Timeout => "SYS_002",
            AppError::WorkerCrashed => "SYS_003",
            AppError::ShuttingDown => "SYS_004",
            AppError::RateLimited { .. } => "RATE_001",
            AppError::Unauthorized => "AUTH_001",
            AppError::InternalServerError => "SYS_005",
        }
    }

    fn how_to_fix(&self) -> String {
        match self {
            AppError::BadInput { .. } => {
                "Check the option values against their documented ranges".to_string()
            }
            AppError::InvalidSource => "Upload a well-formed SVG or PNG file".to_string(),
            AppError::SecurityRejected => {
                "Remove scripts or external references from the source file".to_string()
            }
            AppError::SourceTooSmall { .. } => {
                "Use a larger source image or request smaller output sizes".to_string()
            }
            AppError::RenderFailed { .. }
            | AppError::EncodeFailed { .. }
            | AppError::TooComplex { .. } => {
                "Try a simpler source image or different output options".to_string()
            }
            AppError::Busy => "Retry the request in a few seconds".to_string(),
            AppError::Timeout => "Retry with a simpler source image".to_string(),
            AppError::WorkerCrashed => "Retry the request".to_string(),
            AppError::ShuttingDown => "Retry against another instance".to_string(),
            AppError::RateLimited { .. } => "Wait until the rate limit window resets".to_string(),
            AppError::Unauthorized => "Provide a valid admin password header".to_string(),
            AppError::InternalServerError => {
                "Retry later. If the problem persists, contact support".to_string()
            }
        }
    }

    fn title(&self) -> &'static str {
        match self {
            AppError::BadInput { .. }
            | AppError::InvalidSource
            | AppError::SecurityRejected
            | AppError::SourceTooSmall { .. }
            | AppError::RenderFailed { .. }
            | AppError::EncodeFailed { .. }
            | AppError::TooComplex { .. }
            | AppError::Timeout => "Bad Request",
            AppError::Busy | AppError::ShuttingDown => "Service Unavailable",
            AppError::WorkerCrashed | AppError::InternalServerError => "Internal Server Error",
            AppError::RateLimited { .. } => "Too Many Requests",
            AppError::Unauthorized => "Unauthorized",
        }
    }

    pub fn list_all_errors() -> Vec<String> {
        use strum::IntoEnumIterator;
        AppError::iter()
            .map(|e| format!("{}: {}", e.error_code(), e))
            .collect()
    }

    pub fn to_response(&self) -> ProblemDetails {
        ProblemDetails {
            error_type: format!("https://errors.icon-forge.dev/{}", self.error_code()),
            title: self.title().to_string(),
            status: self.status_code().as_u16(),
            detail: self.to_string(),
            instance: None,
            error_code: self.error_code().to_string(),
            how_to_fix: self.how_to_fix(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        log::error!("database error: {err}");
        AppError::InternalServerError
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        log::error!("io error: {err}");
        AppError::InternalServerError
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let AppError::RateLimited { retry_after_secs } = self {
            builder.insert_header(("Retry-After", retry_after_secs.to_string()));
        }
        builder.json(self.to_response())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadInput { .. }
            | AppError::InvalidSource
            | AppError::SecurityRejected
            | AppError::SourceTooSmall { .. }
            | AppError::RenderFailed { .. }
            | AppError::EncodeFailed { .. }
            | AppError::TooComplex { .. }
            | AppError::Timeout => StatusCode::BAD_REQUEST,
            AppError::Busy | AppError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            AppError::WorkerCrashed | AppError::InternalServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}
