//! Save lifecycle events.
//!
//! Emitted by the save engine to an optional subscriber so callers can audit
//! writes without wrapping the persister.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted during one save call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveEvent {
    pub id: EventId,
    /// Shared by all events of one save call.
    pub save_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: SavePayload,
}

impl SaveEvent {
    pub fn new(save_id: Uuid, payload: SavePayload) -> Self {
        Self {
            id: EventId::new(),
            save_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum SavePayload {
    /// The plan is built and the transaction is about to open.
    SaveStarted {
        roots: usize,
        nodes: usize,
        relationships: usize,
        batches: usize,
    },
    /// One batch ran inside the open transaction.
    BatchExecuted {
        batch: usize,
        nodes_written: usize,
        relationships_written: usize,
    },
    SaveCommitted {
        nodes_written: usize,
        relationships_written: usize,
    },
    /// The transaction was rolled back; nothing from this save is visible.
    SaveRolledBack { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_tagged() {
        let event = SaveEvent::new(
            Uuid::nil(),
            SavePayload::BatchExecuted {
                batch: 1,
                nodes_written: 2,
                relationships_written: 1,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["event_type"], "BatchExecuted");
        assert_eq!(json["payload"]["nodes_written"], 2);
    }
}
