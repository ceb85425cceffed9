//! Domain counters for delivery, DLQ and webhook activity.
//!
//! Rendering happens through the process-wide Prometheus recorder installed
//! by `service_core::observability::init_metrics`.

use std::time::Duration;

pub fn record_send_attempt(adapter: &str) {
    metrics::counter!("ap_send_attempts_total", "adapter" => adapter.to_string()).increment(1);
}

pub fn record_send_success(adapter: &str) {
    metrics::counter!("ap_send_success_total", "adapter" => adapter.to_string()).increment(1);
}

pub fn record_send_failure(adapter: &str, retryable: bool) {
    metrics::counter!(
        "ap_send_fail_total",
        "adapter" => adapter.to_string(),
        "retryable" => retryable.to_string()
    )
    .increment(1);
}

/// JSON channel rejected and the XML channel was tried.
pub fn record_fallback(adapter: &str) {
    metrics::counter!("ap_send_fallback_total", "adapter" => adapter.to_string()).increment(1);
}

pub fn record_dlq_append(tenant: &str) {
    metrics::counter!("dlq_appends_total", "tenant" => tenant.to_string()).increment(1);
}

pub fn record_webhook(source: &'static str, ok: bool, elapsed: Duration) {
    if ok {
        metrics::counter!("ap_webhook_ok_total", "source" => source).increment(1);
    } else {
        metrics::counter!("ap_webhook_fail_total", "source" => source).increment(1);
    }
    metrics::histogram!("ap_webhook_latency_ms", "source" => source)
        .record(elapsed.as_secs_f64() * 1000.0);
}

pub fn record_idempotency_hit() {
    metrics::counter!("idempotency_cache_hits_total").increment(1);
}
