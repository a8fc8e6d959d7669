//! Prometheus metrics for the request pipeline and the reload lifecycle.
//!
//! Collectors self-register against the default registry via
//! `once_cell::Lazy` + `register_*_vec!` at first access; `get_metrics`
//! renders whatever is currently registered for the `/metrics` handler.

use crate::config::TracingConfig;
use crate::error::{GatewayError, Result};
use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramOpts, HistogramVec, TextEncoder};

/// Total requests the engine has admitted, labeled by transport/kind and
/// the terminal `RequestStatus` each one finished with.
static REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mxcp_gateway_requests_total",
        "Total number of MCP requests executed",
        &["transport", "kind", "status"]
    )
    .unwrap()
});

/// End-to-end request duration, from admission through audit emission.
static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new("mxcp_gateway_request_duration_seconds", "Duration of MCP request execution"),
        &["transport", "kind"]
    )
    .unwrap()
});

/// Policy pass outcomes, labeled by pass (input/output) and decision.
static POLICY_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mxcp_gateway_policy_decisions_total",
        "Total number of policy pass outcomes",
        &["pass", "decision"]
    )
    .unwrap()
});

/// Reload attempts, labeled by outcome.
static RELOADS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mxcp_gateway_reloads_total",
        "Total number of reload attempts",
        &["outcome"]
    )
    .unwrap()
});

/// Initializes telemetry. Prometheus collectors self-register via
/// `once_cell`; this only logs the service identity the metrics are
/// reported under. OpenTelemetry export is wired separately by
/// `init_tracing_exporter` when `config.exporter` names one.
pub fn init(config: Option<&TracingConfig>) -> Result<()> {
    let service_name = config.and_then(|c| c.service_name.as_deref()).unwrap_or("mxcp-gateway");
    tracing::info!(service = service_name, "telemetry initialized");
    Ok(())
}

pub fn record_request(transport: &str, kind: &str, status: &str) {
    REQUESTS_TOTAL.with_label_values(&[transport, kind, status]).inc();
}

pub fn record_request_duration(transport: &str, kind: &str, duration_secs: f64) {
    REQUEST_DURATION.with_label_values(&[transport, kind]).observe(duration_secs);
}

pub fn record_policy_decision(pass: &str, decision: &str) {
    POLICY_DECISIONS_TOTAL.with_label_values(&[pass, decision]).inc();
}

pub fn record_reload(outcome: &str) {
    RELOADS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Renders every registered collector in Prometheus text exposition format,
/// for the `/metrics` HTTP handler.
pub fn get_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| GatewayError::internal(format!("failed to encode metrics: {e}")))?;

    String::from_utf8(buffer).map_err(|e| GatewayError::internal(format!("metrics output was not utf8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_renders_metrics() {
        record_request("http", "tool", "success");
        record_request_duration("http", "tool", 0.01);
        record_policy_decision("input", "allow");
        record_reload("success");

        let metrics = get_metrics().unwrap();
        assert!(metrics.contains("mxcp_gateway_requests_total"));
        assert!(metrics.contains("mxcp_gateway_request_duration_seconds"));
        assert!(metrics.contains("mxcp_gateway_policy_decisions_total"));
        assert!(metrics.contains("mxcp_gateway_reloads_total"));
    }
}
