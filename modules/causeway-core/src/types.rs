//! Core value types. Domain-agnostic.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity assigned to a command when it is accepted into a queue, or to an
/// event when it is broadcast. Collision-resistant across stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Mint a fresh id. Callers only need this when supplying an explicit
    /// `caused_by` override; the engine mints ids for everything it accepts.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity token of an event kind. Two defs with the same display name are
/// distinct identities; dispatch always goes by token, never by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    pub(crate) fn next() -> Self {
        Self(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide identity of a store. Used by the bus and collectors to pair
/// subscriptions with the store they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Token returned by `open_stream`, passed back to `close_stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// A request to change state, dispatched by name with a JSON payload.
///
/// A command value is inert until queued: `correlation_id` stays `None` and
/// the value may be built ahead of time or reused. `queue` assigns a fresh
/// id on every acceptance, so a reused value gets a new identity each time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub data: Value,
    pub correlation_id: Option<CorrelationId>,
    pub caused_by: Option<CorrelationId>,
}

impl Command {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            correlation_id: None,
            caused_by: None,
        }
    }

    /// Pin the causal parent explicitly instead of inheriting the ambient
    /// causal context at queue time.
    pub fn with_caused_by(mut self, cause: CorrelationId) -> Self {
        self.caused_by = Some(cause);
        self
    }
}

/// A named event kind. Creating a def allocates a fresh identity token, so
/// two defs named alike stay distinguishable.
#[derive(Debug, Clone)]
pub struct EventDef {
    id: EventId,
    name: Arc<str>,
}

impl EventDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EventId::next(),
            name: name.into().into(),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An emitted occurrence. `correlation_id` is minted at broadcast time;
/// `caused_by` is the id of whichever command or event triggered it, or
/// `None` when there is no traceable originator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEvent {
    pub def_id: EventId,
    pub name: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub caused_by: Option<CorrelationId>,
}

/// Stream listeners observe every broadcast synchronously, in registration
/// order.
pub type StreamListener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Options for `add_command_handler_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHandlerOptions {
    /// Broadcast a synthetic `"<name>:handled"` event after the command
    /// succeeds, for consumers that key off names rather than identities.
    pub notify: bool,
}
