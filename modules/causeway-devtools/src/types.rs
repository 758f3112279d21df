//! Timeline record types and the devtools transport protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use causeway_core::CorrelationId;

/// Command-kind entries are the builtin command-lifecycle events; everything
/// else is event-kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Command,
    Event,
}

/// A flattened record of one broadcast, as retained by the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub store_name: String,
    pub kind: EntryKind,
    pub name: String,
    pub data: Value,
    pub correlation_id: CorrelationId,
    pub caused_by: Option<CorrelationId>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_after: Option<Value>,
}

/// One point in a store's state history, recorded at each `state_changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub store_name: String,
    pub state: Value,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
}

/// Messages a devtools frontend receives over a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DevtoolsMessage {
    StoreConnected {
        store_name: String,
        initial_state: Value,
    },
    Event {
        entry: TimelineEntry,
    },
    StoreDisconnected {
        store_name: String,
    },
}
