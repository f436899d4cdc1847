//! Structured event emission consumed by external monitoring (§2 component
//! 12). This crate only emits; scraping/exporting the `prometheus` registry
//! is the out-of-scope monitoring exporter's job (§1).

use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};
use std::sync::Arc;

/// One struct of counters/gauges/histograms, constructed once at startup
/// and plumbed by handle (Design Notes §9 - no process-wide singleton).
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub requests_total: IntCounterVec,
    pub retries_total: IntCounterVec,
    pub rate_limit_hits_total: IntCounterVec,
    pub proxy_state_transitions_total: IntCounterVec,
    pub proxy_healthy_gauge: IntGaugeVec,
    pub items_processed_total: IntCounterVec,
    pub validation_outcomes_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            prometheus::Opts::new("collector_requests_total", "requests issued per collector source"),
            &["source"],
        )
        .unwrap();
        let retries_total = IntCounterVec::new(
            prometheus::Opts::new("collector_retries_total", "retry attempts per collector source"),
            &["source"],
        )
        .unwrap();
        let rate_limit_hits_total = IntCounterVec::new(
            prometheus::Opts::new("rate_limit_hits_total", "times a caller was made to wait"),
            &["source"],
        )
        .unwrap();
        let proxy_state_transitions_total = IntCounterVec::new(
            prometheus::Opts::new("proxy_state_transitions_total", "proxy pool state transitions"),
            &["to_state"],
        )
        .unwrap();
        let proxy_healthy_gauge = IntGaugeVec::new(
            prometheus::Opts::new("proxy_healthy_count", "currently healthy proxies"),
            &["pool"],
        )
        .unwrap();
        let items_processed_total = IntCounterVec::new(
            prometheus::Opts::new("items_processed_total", "pipeline items by outcome"),
            &["source", "outcome"],
        )
        .unwrap();
        let validation_outcomes_total = IntCounterVec::new(
            prometheus::Opts::new("validation_outcomes_total", "validator pass/fail counts"),
            &["outcome"],
        )
        .unwrap();
        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("request_duration_seconds", "collector request latency"),
            &["source"],
        )
        .unwrap();

        for c in [
            requests_total.clone(),
            retries_total.clone(),
            rate_limit_hits_total.clone(),
        ] {
            registry.register(Box::new(c)).ok();
        }
        registry.register(Box::new(proxy_state_transitions_total.clone())).ok();
        registry.register(Box::new(proxy_healthy_gauge.clone())).ok();
        registry.register(Box::new(items_processed_total.clone())).ok();
        registry.register(Box::new(validation_outcomes_total.clone())).ok();
        registry.register(Box::new(request_duration_seconds.clone())).ok();

        Arc::new(Self {
            registry,
            requests_total,
            retries_total,
            rate_limit_hits_total,
            proxy_state_transitions_total,
            proxy_healthy_gauge,
            items_processed_total,
            validation_outcomes_total,
            request_duration_seconds,
        })
    }

    /// Sums a counter family across every label combination, used by the
    /// Orchestrator to populate `DailyReport.api_requests`/`rate_limit_hits`
    /// (§3 DailyReport, §4.11 step 3) from the same registry external
    /// monitoring would scrape, rather than keeping a second set of plain
    /// counters.
    pub fn sum_counter(&self, name: &str) -> u64 {
        self.registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)
            .map(|family| family.get_metric().iter().map(|m| m.get_counter().get_value() as u64).sum())
            .unwrap_or(0)
    }
}

/// A [`crate::rate_limiter::RateLimitObserver`] that forwards into the
/// metrics registry and a structured log line, composing rather than
/// replacing observer behavior.
pub struct MetricsRateLimitObserver {
    pub metrics: Arc<Metrics>,
}

impl crate::rate_limiter::RateLimitObserver for MetricsRateLimitObserver {
    fn on_request(&self, source: &str) {
        self.metrics.requests_total.with_label_values(&[source]).inc();
    }

    fn on_limit_hit(&self, source: &str, wait: std::time::Duration) {
        self.metrics
            .rate_limit_hits_total
            .with_label_values(&[source])
            .inc();
        tracing::warn!(source, wait_ms = wait.as_millis() as u64, "rate limit hit");
    }

    fn on_reset(&self, source: &str) {
        tracing::debug!(source, "rate limiter window reset for waiter");
    }
}
