//! Seams between stores and their downstream consumers.

use serde_json::Value;

use crate::types::{ListenerId, StoreId, StreamListener};

/// A store viewed purely as an event stream plus a state snapshot.
///
/// Implemented by `Store` and `SealedStore`; consumed by the event bus,
/// the timeline collector, and the persistence/tracing adapters, none of
/// which need (or get) handler registration.
pub trait EventSource: Send + Sync {
    /// Process-wide identity of the underlying store.
    fn store_id(&self) -> StoreId;

    /// Current state serialized to JSON. `Value::Null` if the state cannot
    /// be represented.
    fn state_snapshot(&self) -> Value;

    /// Register a listener invoked synchronously, in registration order,
    /// for every broadcast event.
    fn open_stream(&self, listener: StreamListener) -> ListenerId;

    /// Remove a previously registered listener. Unknown ids are ignored.
    fn close_stream(&self, listener: ListenerId);
}
