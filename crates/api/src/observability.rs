use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const HTTP_REQUESTS_TOTAL: &str = "obrolan_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "obrolan_api_http_request_duration_seconds";
const HTTP_REQUEST_ERRORS_TOTAL: &str = "obrolan_api_http_errors_total";
const REALTIME_EVENTS_TOTAL: &str = "obrolan_api_realtime_events_total";
const REALTIME_CONNECTIONS: &str = "obrolan_api_realtime_connections";
const REALTIME_BROADCAST_RECIPIENTS: &str = "obrolan_api_realtime_broadcast_recipients";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    let status_code = status.as_u16().to_string();
    let result = if status.is_server_error() {
        "error"
    } else {
        "success"
    };

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone(),
        "result" => result
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone()
    )
    .record(elapsed.as_secs_f64());

    if status.is_server_error() {
        counter!(
            HTTP_REQUEST_ERRORS_TOTAL,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status_code
        )
        .increment(1);
    }
}

/// Channel lifecycle and command outcomes. `event` is one of connect, disconnect,
/// command or broadcast.
pub fn register_realtime_event(event: &str, name: &str, outcome: &str) {
    counter!(
        REALTIME_EVENTS_TOTAL,
        "event" => event.to_string(),
        "name" => name.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    match (event, outcome) {
        ("connect", "ok") => gauge!(REALTIME_CONNECTIONS).increment(1.0),
        ("disconnect", _) => gauge!(REALTIME_CONNECTIONS).decrement(1.0),
        _ => {}
    }
}

pub fn register_broadcast(name: &str, recipients: usize) {
    register_realtime_event("broadcast", name, "ok");
    histogram!(REALTIME_BROADCAST_RECIPIENTS, "name" => name.to_string())
        .record(recipients as f64);
}
