use actix_web::{web, HttpRequest, HttpResponse, Result};
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::AppState;

const ADMIN_HEADER: &str = "X-Admin-Secret";

/// Constant-time comparison of the request's admin header against the
/// configured secret; timing differences must not leak how many leading
/// bytes matched.
fn authorize(req: &HttpRequest, state: &AppState) -> Result<(), AppError> {
    let provided = req
        .headers()
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let expected = state.config.admin_password.as_bytes();
    let matches: bool = provided.as_bytes().ct_eq(expected).into();
    if matches && !expected.is_empty() {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

pub async fn stats(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    authorize(&req, &state)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversion_metric")
        .fetch_one(&state.db)
        .await
        .map_err(AppError::from)?;
    let failures: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM conversion_metric WHERE success = false")
            .fetch_one(&state.db)
            .await
            .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "totalConversions": total,
        "failedConversions": failures,
    })))
}

pub async fn delete_failures(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    authorize(&req, &state)?;

    let result = sqlx::query("DELETE FROM conversion_metric WHERE success = false")
        .execute(&state.db)
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "deleted": result.rows_affected(),
    })))
}
