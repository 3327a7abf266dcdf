//! Request and cache metrics reported through the `metrics` facade.

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use dataset_reader::{BreakerState, CacheStats};

/// Times one request and records it when finished.
pub struct RequestTimer {
    endpoint: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn start(endpoint: &'static str) -> Self {
        counter!("multidim_requests_total", "endpoint" => endpoint).increment(1);
        Self {
            endpoint,
            start: Instant::now(),
        }
    }

    /// Record the duration and, for failures, the status code.
    pub fn finish(self, status: u16) {
        let elapsed = self.start.elapsed().as_secs_f64();
        histogram!("multidim_request_duration_seconds", "endpoint" => self.endpoint).record(elapsed);

        if status >= 400 {
            counter!(
                "multidim_request_errors_total",
                "endpoint" => self.endpoint,
                "status" => status.to_string()
            )
            .increment(1);
        }
    }
}

/// Publish metadata cache counters as gauges.
///
/// The cache keeps its own atomic counters; they are copied here right
/// before each scrape.
pub fn record_cache_stats(stats: &CacheStats, breaker: BreakerState) {
    gauge!("multidim_metadata_cache_hits").set(stats.hits as f64);
    gauge!("multidim_metadata_cache_misses").set(stats.misses as f64);
    gauge!("multidim_metadata_cache_computes").set(stats.computes as f64);
    gauge!("multidim_metadata_cache_joined").set(stats.joined as f64);
    gauge!("multidim_metadata_cache_backend_errors").set(stats.backend_errors as f64);
    gauge!("multidim_metadata_cache_bypassed").set(stats.bypassed as f64);
    gauge!("multidim_metadata_cache_in_flight").set(stats.in_flight as f64);
    gauge!("multidim_metadata_cache_hit_rate_percent").set(stats.hit_rate());
    gauge!("multidim_metadata_cache_degraded").set(if stats.degraded { 1.0 } else { 0.0 });
    gauge!("multidim_metadata_cache_breaker_open")
        .set(if breaker == BreakerState::Closed { 0.0 } else { 1.0 });
}
