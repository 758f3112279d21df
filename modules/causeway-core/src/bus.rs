//! Cross-store event routing.
//!
//! The bus is a pure router: it holds a connection list and a handler
//! registry, and forwards matching events with their causal fields
//! untouched. A reaction typically queues a command on a different
//! connected store; that `queue` call runs inside the broadcast's causal
//! scope, so the new command's parent is the triggering event without the
//! reaction having to thread anything through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::traits::EventSource;
use crate::types::{EventDef, EventId, ListenerId, StoreEvent, StoreId, StreamListener};

type BusHandler = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct Connection {
    store_id: StoreId,
    listener: ListenerId,
    store: Box<dyn EventSource>,
}

struct BusInner {
    connections: Mutex<Vec<Connection>>,
    handlers: Mutex<HashMap<EventId, Vec<BusHandler>>>,
}

/// Connects any number of stores' output streams to reaction functions
/// keyed by event identity.
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                connections: Mutex::new(Vec::new()),
                handlers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to a store's stream. Reconnecting an already-connected
    /// store is a no-op.
    pub fn connect(&self, store: impl EventSource + 'static) {
        let mut connections = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if connections
            .iter()
            .any(|connection| connection.store_id == store.store_id())
        {
            return;
        }

        let listener = bus_listener(Arc::downgrade(&self.inner));
        let listener_id = store.open_stream(listener);
        connections.push(Connection {
            store_id: store.store_id(),
            listener: listener_id,
            store: Box::new(store),
        });
    }

    /// Unsubscribe from a store's stream. No-op when not connected.
    pub fn disconnect(&self, store: &dyn EventSource) {
        let connection = {
            let mut connections = self
                .inner
                .connections
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            connections
                .iter()
                .position(|connection| connection.store_id == store.store_id())
                .map(|index| connections.remove(index))
        };
        if let Some(connection) = connection {
            connection.store.close_stream(connection.listener);
        }
    }

    /// Register a reaction for an event identity. Runs for matching
    /// broadcasts from every connected store.
    pub fn on(&self, def: &EventDef, handler: impl Fn(&StoreEvent) + Send + Sync + 'static) {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(def.id())
            .or_default()
            .push(Arc::new(handler));
    }
}

fn bus_listener(inner: Weak<BusInner>) -> StreamListener {
    Arc::new(move |event| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let handlers = inner
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.def_id)
            .cloned();
        if let Some(handlers) = handlers {
            for handler in handlers {
                handler(event);
            }
        }
    })
}
