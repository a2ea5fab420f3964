//! Prometheus metrics exposition
//!
//! The library crates emit their own counters through the `metrics` facade:
//!
//! - `session_auth_events_total` (counter): label `kind`
//! - `session_recoveries_total` (counter): labels `path`, `outcome`
//! - `session_deep_links_total` (counter): label `outcome`
//!
//! The agent adds the ones below for its HTTP surfaces.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a callback redirect received on the link listener.
pub fn record_callback(accepted: bool) {
    let outcome = if accepted { "forwarded" } else { "dropped" };
    metrics::counter!("agent_callbacks_total", "outcome" => outcome).increment(1);
}

/// Record a control API command with its outcome.
pub fn record_command(command: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!("agent_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);
}
