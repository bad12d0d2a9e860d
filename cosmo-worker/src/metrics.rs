//! Prometheus counters/histograms for the job and stream processors.
//!
//! Grounded verbatim on `messaging::nats::metrics::NatsMetrics`, relabeled
//! by `stream`/`class` instead of a single `processor` name since one job
//! processor here serves every registered class.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

#[derive(Debug, Clone, Copy, Default)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn job_received(&self, stream: &str) {
        counter!("cosmo_jobs_received_total", "stream" => stream.to_string()).increment(1);
    }

    pub fn job_processed(&self, stream: &str, class: &str, duration: Duration) {
        counter!(
            "cosmo_jobs_processed_total",
            "stream" => stream.to_string(),
            "class" => class.to_string()
        )
        .increment(1);

        histogram!(
            "cosmo_job_duration_seconds",
            "stream" => stream.to_string(),
            "class" => class.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(&self, stream: &str, class: &str, category: &str) {
        counter!(
            "cosmo_jobs_failed_total",
            "stream" => stream.to_string(),
            "class" => class.to_string(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    pub fn job_retried(&self, stream: &str, class: &str) {
        counter!(
            "cosmo_jobs_retried_total",
            "stream" => stream.to_string(),
            "class" => class.to_string()
        )
        .increment(1);
    }

    pub fn job_dead_lettered(&self, stream: &str, class: &str) {
        counter!(
            "cosmo_jobs_dead_lettered_total",
            "stream" => stream.to_string(),
            "class" => class.to_string()
        )
        .increment(1);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamMetrics;

impl StreamMetrics {
    pub fn batch_received(&self, stream: &str, num_pending: u64) {
        counter!("cosmo_stream_batches_total", "stream" => stream.to_string()).increment(1);
        gauge!("cosmo_stream_pending", "stream" => stream.to_string()).set(num_pending as f64);
    }

    pub fn batch_done(&self, stream: &str, elapsed: Duration) {
        histogram!("cosmo_stream_batch_duration_seconds", "stream" => stream.to_string())
            .record(elapsed.as_secs_f64());
    }

    pub fn batch_failed(&self, stream: &str) {
        counter!("cosmo_stream_batches_failed_total", "stream" => stream.to_string()).increment(1);
    }
}

/// Installs the global Prometheus recorder and returns its render handle.
pub fn init_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
