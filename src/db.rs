use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::error::AppResult;

const CREATE_RATE_LIMIT: &str = "
CREATE TABLE IF NOT EXISTS rate_limit (
    identity_hash TEXT PRIMARY KEY,
    count BIGINT NOT NULL,
    window_start BIGINT NOT NULL,
    expires_at BIGINT NOT NULL
)";

const CREATE_CONVERSION_METRIC: &str = "
CREATE TABLE IF NOT EXISTS conversion_metric (
    id TEXT PRIMARY KEY,
    identity_hash TEXT NOT NULL,
    input_format TEXT NOT NULL,
    output_format TEXT NOT NULL,
    input_bytes BIGINT NOT NULL,
    output_bytes BIGINT,
    processing_ms BIGINT NOT NULL,
    success BOOLEAN NOT NULL,
    error_message TEXT,
    conversion_options TEXT NOT NULL,
    worker_id BIGINT,
    created_at BIGINT NOT NULL
)";

/// Opens the pool and creates both tables if they don't exist yet. There is
/// no separate migration tool in scope for this service (per the spec's
/// Non-goals); schema setup runs once at startup, the way the teacher
/// creates its cache directory in `main.rs`.
pub async fn connect_and_migrate(database_url: &str) -> AppResult<AnyPool> {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    sqlx::query(CREATE_RATE_LIMIT).execute(&pool).await?;
    sqlx::query(CREATE_CONVERSION_METRIC).execute(&pool).await?;
    Ok(pool)
}

/// Creates both tables against an already-open pool; used by unit tests
/// that stand up their own in-memory `sqlite::memory:` pool instead of
/// going through `connect_and_migrate`.
#[cfg(test)]
pub async fn migrate_for_test(pool: &AnyPool) {
    sqlx::query(CREATE_RATE_LIMIT).execute(pool).await.unwrap();
    sqlx::query(CREATE_CONVERSION_METRIC)
        .execute(pool)
        .await
        .unwrap();
}
