//! Telemetry sink: structured events per turn and exception tracking for failures that escape
//! the dispatcher.
//!
//! Emission is fire-and-forget. Sinks never return errors and never fail the turn they instrument.

use crate::config::TelemetryConfig;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// Event emitted for every non-empty inbound message.
pub const BOT_QUESTION_EVENT: &str = "BotQuestion";

pub type Properties = BTreeMap<String, String>;

pub trait TelemetrySink: Send + Sync {
    fn track_event(&self, name: &str, properties: &Properties);
    fn track_exception(&self, error: &(dyn Error + 'static), properties: &Properties);
}

/// Writes events as JSON property bags on the `telemetry` log target.
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn track_event(&self, name: &str, properties: &Properties) {
        let props = serde_json::to_string(properties).unwrap_or_default();
        log::info!(target: "telemetry", "event {} {}", name, props);
    }

    fn track_exception(&self, error: &(dyn Error + 'static), properties: &Properties) {
        let props = serde_json::to_string(properties).unwrap_or_default();
        log::error!(target: "telemetry", "exception {} {}", error, props);
    }
}

pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn track_event(&self, _name: &str, _properties: &Properties) {}
    fn track_exception(&self, _error: &(dyn Error + 'static), _properties: &Properties) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryRecord {
    Event {
        name: String,
        properties: Properties,
    },
    Exception {
        message: String,
        properties: Properties,
    },
}

/// Keeps everything it receives; for tests and embedders that inspect telemetry.
#[derive(Default)]
pub struct MemoryTelemetry {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn events(&self, name: &str) -> Vec<Properties> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                TelemetryRecord::Event { name: n, properties } if n == name => Some(properties),
                _ => None,
            })
            .collect()
    }

    pub fn exceptions(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                TelemetryRecord::Exception { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, record: TelemetryRecord) {
        if let Ok(mut g) = self.records.lock() {
            g.push(record);
        }
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn track_event(&self, name: &str, properties: &Properties) {
        self.push(TelemetryRecord::Event {
            name: name.to_string(),
            properties: properties.clone(),
        });
    }

    fn track_exception(&self, error: &(dyn Error + 'static), properties: &Properties) {
        self.push(TelemetryRecord::Exception {
            message: error.to_string(),
            properties: properties.clone(),
        });
    }
}

/// Sink selected by config: logging when enabled, otherwise no-op.
pub fn from_config(config: &TelemetryConfig) -> Arc<dyn TelemetrySink> {
    if config.enabled {
        Arc::new(LogTelemetry)
    } else {
        Arc::new(NoopTelemetry)
    }
}
