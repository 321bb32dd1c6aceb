use serde::Serialize;
use sqlx::AnyPool;

use crate::job::{BgRemoval, JobInputs, OutputFormat, SourceType};

/// Append-only record of one completed or failed conversion.
#[derive(Debug, Clone)]
pub struct ConversionMetric {
    pub identity_hash: String,
    pub input_format: &'static str,
    pub output_format: &'static str,
    pub input_bytes: i64,
    pub output_bytes: Option<i64>,
    pub processing_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub conversion_options: String,
    pub worker_id: Option<i64>,
    pub created_at: i64,
}

#[derive(Serialize)]
struct ConversionOptionsJson {
    format: &'static str,
    scale_percent: f64,
    corner_radius_percent: f64,
    bg_removal: &'static str,
}

impl ConversionMetric {
    pub fn from_job(
        identity_hash: String,
        inputs: &JobInputs,
        output_bytes: Option<usize>,
        processing_ms: i64,
        success: bool,
        error_message: Option<String>,
        created_at: i64,
        worker_id: Option<i64>,
    ) -> Self {
        let options = ConversionOptionsJson {
            format: format_label(inputs.format),
            scale_percent: inputs.scale_percent,
            corner_radius_percent: inputs.corner_radius_percent,
            bg_removal: match inputs.bg_removal {
                BgRemoval::None => "none",
                BgRemoval::Color(_) => "color",
                BgRemoval::Smart => "smart",
            },
        };
        Self {
            identity_hash,
            input_format: match inputs.source_type {
                SourceType::Svg => "svg",
                SourceType::Png => "png",
            },
            output_format: format_label(inputs.format),
            input_bytes: inputs.source_bytes.len() as i64,
            output_bytes: output_bytes.map(|n| n as i64),
            processing_ms,
            success,
            error_message,
            conversion_options: serde_json::to_string(&options).unwrap_or_default(),
            worker_id,
            created_at,
        }
    }
}

fn format_label(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Ico => "ico",
        OutputFormat::Icns => "icns",
        OutputFormat::Favicon => "favicon",
        OutputFormat::Png => "png",
        OutputFormat::All => "all",
    }
}

/// Write-only sink from the request handler's perspective. A failed write
/// is logged and dropped; it never affects the HTTP response.
#[derive(Clone)]
pub struct MetricsSink {
    pool: AnyPool,
}

impl MetricsSink {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Fires the insert on its own task so the caller (the HTTP handler) is
    /// never blocked or failed by a metrics-store outage.
    pub fn record_async(&self, metric: ConversionMetric) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(err) = insert(&pool, &metric).await {
                log::warn!("failed to record conversion metric: {err}");
            }
        });
    }
}

async fn insert(pool: &AnyPool, metric: &ConversionMetric) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO conversion_metric
            (id, identity_hash, input_format, output_format, input_bytes, output_bytes,
             processing_ms, success, error_message, conversion_options, worker_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid_like())
    .bind(&metric.identity_hash)
    .bind(metric.input_format)
    .bind(metric.output_format)
    .bind(metric.input_bytes)
    .bind(metric.output_bytes)
    .bind(metric.processing_ms)
    .bind(metric.success)
    .bind(&metric.error_message)
    .bind(&metric.conversion_options)
    .bind(metric.worker_id)
    .bind(metric.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// A lightweight unique id for the metrics row. A real UUID crate isn't
/// otherwise needed by this service, so this sticks to the hash primitives
/// already in the dependency tree.
fn uuid_like() -> String {
    use sha2::{Digest, Sha256};
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(n.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ColorDepth, Colorspace, PngOptions};
    use sqlx::Row;

    fn sample_inputs() -> JobInputs {
        JobInputs {
            source_type: SourceType::Svg,
            source_bytes: vec![1, 2, 3],
            original_filename: "x.svg".into(),
            format: OutputFormat::Ico,
            scale_percent: 100.0,
            corner_radius_percent: 0.0,
            bg_removal: BgRemoval::None,
            png_options: PngOptions {
                size: 512,
                dpi: 72,
                colorspace: Colorspace::Srgb,
                color_depth: ColorDepth::ThirtyTwo,
            },
            source_dimensions: None,
        }
    }

    #[tokio::test]
    async fn record_async_is_fire_and_forget_and_eventually_lands() {
        sqlx::any::install_default_drivers();
        let pool = AnyPool::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate_for_test(&pool).await;
        let sink = MetricsSink::new(pool.clone());

        let metric = ConversionMetric::from_job(
            "abcdef0123456789".into(),
            &sample_inputs(),
            Some(4096),
            42,
            true,
            None,
            1_000,
            Some(2),
        );
        sink.record_async(metric);

        // Give the spawned insert a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM conversion_metric")
            .fetch_one(&pool)
            .await
            .unwrap()
            .try_get("c")
            .unwrap();
        assert_eq!(count, 1);
    }
}
