use std::env;

/// Runtime configuration, read once at startup from the environment the way
/// the teacher reads `PORT` in `main.rs`.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub admin_password: String,
    pub cors_origin: String,
    pub queue_max: usize,
    pub job_timeout_secs: u64,
    pub worker_count: usize,
    pub rate_limit_window_secs: i64,
    pub rate_limit_max: i64,
    pub rate_limit_sweep_secs: u64,
    pub max_upload_bytes: usize,
    pub shutdown_grace_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(1);

        Self {
            port: env_or("PORT", 3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite::memory:".to_string()),
            admin_password: env::var("ADMIN_PASSWORD").unwrap_or_else(|_| String::new()),
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            queue_max: env_or("QUEUE_MAX", 100),
            job_timeout_secs: env_or("JOB_TIMEOUT_SECS", 30),
            worker_count: env_or("WORKER_COUNT", default_workers),
            rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 3600),
            rate_limit_max: env_or("RATE_LIMIT_MAX", 60),
            rate_limit_sweep_secs: env_or("RATE_LIMIT_SWEEP_SECS", 300),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            shutdown_grace_secs: env_or("SHUTDOWN_GRACE_SECS", 5),
        }
    }

    pub fn log_level() -> String {
        env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    }
}
