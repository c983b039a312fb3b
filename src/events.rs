//! Append-only event log
//!
//! Every state transition the kernel makes is recorded as a typed,
//! sequence-numbered event. `timestamp_logical` is a monotonic counter
//! derived from the append order, never wall-clock. A log replayed through
//! [`EventLog::to_interactions`] reconstructs the resolved-interaction set
//! exactly.

use crate::error::KernelResult;
use crate::types::SoftInteraction;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;

/// Event discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    AgentRegistered,
    ActionEmitted,
    AgentSkipped,
    FrozenActionDropped,
    InteractionProposed,
    InteractionResolved,
    InteractionAbandoned,
    AuditExecuted,
    AgentFrozen,
    AgentUnfrozen,
    AgentQuarantined,
    StakeSlashed,
    CollusionFlagged,
    EpochMetrics,
    RunCompleted,
    RunCancelled,
    RunCrashed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde rename so the wire form and display form agree
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One log record. Payload keys are sorted (BTree-backed map), so identical
/// runs serialize byte-identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp_logical: u64,
    pub epoch: u64,
    pub step: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Map<String, Value>,
}

/// Destination for committed events. Commit must complete before control
/// returns from the append call.
pub trait EventSink {
    fn commit(&mut self, event: &Event) -> io::Result<()>;
}

/// Append-only typed event stream with strictly monotonic sequence numbers
pub struct EventLog {
    events: Vec<Event>,
    next_seq: u64,
    sink: Option<Box<dyn EventSink>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_seq: 0,
            sink: None,
        }
    }

    /// Attach a sink; each appended event is committed before append returns
    pub fn with_sink(sink: Box<dyn EventSink>) -> Self {
        Self {
            events: Vec::new(),
            next_seq: 0,
            sink: Some(sink),
        }
    }

    /// Append an event. `payload` should be a JSON object; any other value
    /// is wrapped under a `"value"` key.
    pub fn append(
        &mut self,
        epoch: u64,
        step: u64,
        kind: EventKind,
        payload: Value,
    ) -> KernelResult<&Event> {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        let event = Event {
            seq,
            timestamp_logical: seq,
            epoch,
            step,
            kind,
            payload,
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.commit(&event)?;
        }
        self.events.push(event);
        Ok(self.events.last().expect("just pushed"))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Replay iterator in sequence order
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Count events of one kind
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    /// SHA-256 digest over the serialized event stream, hex-encoded.
    /// Stable across runs with identical config and seed.
    pub fn digest(&self) -> KernelResult<String> {
        let mut hasher = Sha256::new();
        for event in &self.events {
            hasher.update(serde_json::to_string(event)?.as_bytes());
            hasher.update(b"\n");
        }
        let out = hasher.finalize();
        Ok(out.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Reconstruct the resolved-interaction set from the log
    pub fn to_interactions(&self) -> KernelResult<Vec<SoftInteraction>> {
        to_interactions(self.events.iter())
    }
}

/// Reconstruct resolved interactions from any event stream (e.g. one loaded
/// back from `events.jsonl`)
pub fn to_interactions<'a>(
    events: impl Iterator<Item = &'a Event>,
) -> KernelResult<Vec<SoftInteraction>> {
    let mut out = Vec::new();
    for event in events {
        if event.kind != EventKind::InteractionResolved {
            continue;
        }
        if let Some(value) = event.payload.get("interaction") {
            let interaction: SoftInteraction = serde_json::from_value(value.clone())?;
            out.push(interaction);
        }
    }
    Ok(out)
}
