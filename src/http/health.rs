use actix_web::{web, HttpResponse, Result};

use crate::AppState;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "icon-forge"
        }))),
        Err(err) => {
            log::error!("health probe failed: {err}");
            Ok(HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unavailable"
            })))
        }
    }
}

pub async fn list_errors() -> Result<HttpResponse> {
    let errors = crate::error::AppError::list_all_errors();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "errors": errors,
        "total": errors.len()
    })))
}
