pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod image;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod rate_limit;
pub mod sanitizer;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use sqlx::AnyPool;

use config::Config;
use metrics::MetricsSink;
use queue::JobQueue;
use rate_limit::RateLimiter;
use worker::WorkerPool;

/// Shared, cloneable application state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub pool: Arc<WorkerPool>,
    pub db: AnyPool,
    pub rate_limiter: RateLimiter,
    pub metrics: MetricsSink,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> error::AppResult<Self> {
        let db = db::connect_and_migrate(&config.database_url).await?;
        let queue = JobQueue::new(config.queue_max);
        let pool = WorkerPool::start(Arc::clone(&queue), config.worker_count);
        let rate_limiter = RateLimiter::new(
            db.clone(),
            config.rate_limit_window_secs,
            config.rate_limit_max,
        );
        rate_limiter
            .clone()
            .spawn_sweeper(Duration::from_secs(config.rate_limit_sweep_secs));
        let metrics = MetricsSink::new(db.clone());

        Ok(Self {
            queue,
            pool,
            db,
            rate_limiter,
            metrics,
            config: Arc::new(config),
        })
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.config.job_timeout_secs)
    }

    pub async fn shutdown(&self) {
        self.pool
            .shutdown(Duration::from_secs(self.config.shutdown_grace_secs));
    }
}
