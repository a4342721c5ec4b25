//! Telemetry events emitted by the dispatch engine
//!
//! The router and executor emit named events at well-defined points; the
//! crate never aggregates them. Collection is pluggable through
//! [`TelemetrySink`]: the default [`TracingSink`] forwards events to
//! `tracing`, [`NullSink`] drops them, and [`CaptureSink`] records them for
//! assertions in tests.
//!
//! # Event reference
//!
//! | event | measurements | metadata |
//! |---|---|---|
//! | `procedure.start` | `system_time` | `procedure`, `kind`, `unit` |
//! | `procedure.stop` | `duration` | `procedure`, `kind`, `unit` |
//! | `procedure.exception` | `duration` | `procedure`, `kind`, `unit`, `error_kind`, `reason` |
//! | `router.lookup.start` | `system_time` | `router`, `path` |
//! | `router.lookup.stop` | `duration` | `router`, `path`, `found` |
//! | `router.alias.resolved` | (none) | `router`, `from`, `to`, `deprecated` |
//! | `router.batch.start` | `system_time`, `batch_size` | `router`, `paths` |
//! | `router.batch.stop` | `duration` | `router`, `success_count`, `error_count` |
//!
//! Durations are reported in milliseconds; `system_time` is milliseconds
//! since the Unix epoch.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Event names emitted by the core.
pub mod events {
    /// A procedure execution began.
    pub const PROCEDURE_START: &str = "procedure.start";
    /// A procedure execution completed successfully.
    pub const PROCEDURE_STOP: &str = "procedure.stop";
    /// A procedure execution failed.
    pub const PROCEDURE_EXCEPTION: &str = "procedure.exception";
    /// A dispatch lookup began.
    pub const ROUTER_LOOKUP_START: &str = "router.lookup.start";
    /// A dispatch lookup (and the call it resolved to) finished.
    pub const ROUTER_LOOKUP_STOP: &str = "router.lookup.stop";
    /// A path was resolved through an alias.
    pub const ROUTER_ALIAS_RESOLVED: &str = "router.alias.resolved";
    /// A batch fan-out began.
    pub const ROUTER_BATCH_START: &str = "router.batch.start";
    /// A batch fan-out finished.
    pub const ROUTER_BATCH_STOP: &str = "router.batch.stop";
}

/// A single telemetry event.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// Hierarchical event name, e.g. `procedure.start`
    pub name: &'static str,
    /// Numeric measurements taken at the emission point
    pub measurements: serde_json::Map<String, serde_json::Value>,
    /// Identifying metadata for the emission point
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TelemetryEvent {
    /// Create an event with empty measurements and metadata.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            measurements: serde_json::Map::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a measurement.
    #[must_use = "This method returns a new TelemetryEvent and does not modify self"]
    pub fn measurement(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.measurements.insert(key.into(), value.into());
        self
    }

    /// Attach a metadata entry.
    #[must_use = "This method returns a new TelemetryEvent and does not modify self"]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach the current wall-clock time as the `system_time` measurement.
    #[must_use = "This method returns a new TelemetryEvent and does not modify self"]
    pub fn with_system_time(self) -> Self {
        self.measurement("system_time", epoch_millis())
    }

    /// Attach a `duration` measurement in milliseconds.
    #[must_use = "This method returns a new TelemetryEvent and does not modify self"]
    pub fn with_duration(self, duration: Duration) -> Self {
        self.measurement("duration", duration.as_millis() as u64)
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Consumer of telemetry events.
///
/// Sinks must be safe for concurrent emission; the router emits from every
/// in-flight call.
pub trait TelemetrySink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: TelemetryEvent);
}

/// Default sink forwarding events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        debug!(
            target: "nexus_rpc::telemetry",
            event = event.name,
            measurements = %serde_json::Value::Object(event.measurements),
            metadata = %serde_json::Value::Object(event.metadata),
            "telemetry"
        );
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that records every event, for assertions in tests.
#[derive(Debug, Default)]
pub struct CaptureSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl CaptureSink {
    /// Create an empty capture sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events captured so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// The names of all captured events, in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|e| e.iter().map(|ev| ev.name).collect())
            .unwrap_or_default()
    }

    /// Drop everything captured so far.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl TelemetrySink for CaptureSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
