//! Telemetry sink for request failures.

use serde_json::Value;

pub trait TelemetryReporter: Send + Sync {
    fn log_telemetry(&self, event_name: &str, properties: Value);
}

/// Reports telemetry as `info` events under the `tsz_host::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetryReporter;

impl TelemetryReporter for TracingTelemetryReporter {
    fn log_telemetry(&self, event_name: &str, properties: Value) {
        tracing::info!(target: "tsz_host::telemetry", event = event_name, %properties);
    }
}
