use std::io::Write;

use lumen_protocol::{now_ms, FieldState, LifecycleEvent, RuntimeStats};
use serde::Serialize;

/// Write one JSON line to stdout and flush it, so piped readers see
/// records as they happen. Records that fail to serialize are skipped.
pub fn emit<T: Serialize>(record: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, record).is_ok() {
        let _ = out.write_all(b"\n");
        let _ = out.flush();
    }
}

// ── Session records ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub id: String,
    pub mode: &'static str,
    pub addr: String,
    pub signature: String,
    pub timestamp: u64,
}

impl EventStarted {
    pub fn new(id: &str, mode: &'static str, addr: String, signature: String) -> Self {
        Self {
            event: "started",
            id: id.to_string(),
            mode,
            addr,
            signature,
            timestamp: now_ms(),
        }
    }
}

/// A runtime lifecycle event with the time it was observed.
#[derive(Serialize)]
pub struct EventLifecycle<'a> {
    pub timestamp: u64,
    #[serde(flatten)]
    pub inner: &'a LifecycleEvent,
}

impl<'a> EventLifecycle<'a> {
    pub fn new(inner: &'a LifecycleEvent) -> Self {
        Self {
            timestamp: now_ms(),
            inner,
        }
    }
}

/// Periodic counters plus the current field reading.
#[derive(Serialize)]
pub struct EventSummary<'a> {
    pub event: &'static str,
    pub id: &'a str,
    pub stats: &'a RuntimeStats,
    pub field: &'a FieldState,
    pub timestamp: u64,
}

impl<'a> EventSummary<'a> {
    pub fn new(id: &'a str, stats: &'a RuntimeStats, field: &'a FieldState) -> Self {
        Self {
            event: "summary",
            id,
            stats,
            field,
            timestamp: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_protocol::FieldAggregator;

    #[test]
    fn lifecycle_record_is_flat() {
        let event = LifecycleEvent::FieldStateChanged {
            field: FieldAggregator::default().snapshot(),
        };
        let value = serde_json::to_value(EventLifecycle::new(&event)).unwrap();
        assert_eq!(value["event"], "field-state-changed");
        assert_eq!(value["field"]["coherence"], 50.0);
        assert!(value["timestamp"].as_u64().is_some());
    }
}
