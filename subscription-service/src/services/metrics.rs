use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls are no-ops, so every
/// `Application` built in one process (tests) shares the first recorder.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
    }
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_payment_initiated(with_coupon: bool) {
    let coupon = if with_coupon { "true" } else { "false" };
    counter!("payments_initiated_total", "coupon" => coupon).increment(1);
}

pub fn record_payment_transition(from: &str, to: &str) {
    counter!(
        "payment_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// `reason` is one of `payment`, `subscribe`, `renew`, `assign`.
pub fn record_subscription_activated(reason: &'static str) {
    counter!("subscriptions_activated_total", "reason" => reason).increment(1);
}

/// `outcome` is `applied` or a rejection code.
pub fn record_coupon_evaluation(outcome: &'static str) {
    counter!("coupon_evaluations_total", "outcome" => outcome).increment(1);
}

pub fn record_gateway_request(operation: &'static str, outcome: &'static str) {
    counter!(
        "gateway_requests_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}
