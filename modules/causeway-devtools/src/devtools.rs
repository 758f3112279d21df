//! The devtools facade: collector plus live forwarding over a transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use causeway_core::{builtin, CorrelationId, EventSource, ListenerId, StoreEvent};

use crate::collector::EventCollector;
use crate::transport::Transport;
use crate::types::{DevtoolsMessage, EntryKind, StateSnapshot, TimelineEntry};

#[derive(Debug, Clone)]
pub struct DevtoolsOptions {
    /// Global ring-buffer bound for the collector timeline.
    pub max_events: usize,
    /// Log each forwarded entry at debug level.
    pub log_events: bool,
}

impl Default for DevtoolsOptions {
    fn default() -> Self {
        Self {
            max_events: 1000,
            log_events: false,
        }
    }
}

struct Connection {
    store: Box<dyn EventSource>,
    listener: ListenerId,
}

/// Connects stores to a transport-backed frontend while recording their
/// timelines for queries.
pub struct Devtools {
    collector: EventCollector,
    transport: Arc<dyn Transport>,
    log_events: bool,
    connections: Mutex<HashMap<String, Connection>>,
}

impl Devtools {
    pub fn new(transport: Arc<dyn Transport>, options: DevtoolsOptions) -> Self {
        Self {
            collector: EventCollector::new(options.max_events),
            transport,
            log_events: options.log_events,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a store under a name. Reconnecting under the same name
    /// replaces the prior attachment.
    pub fn connect<T>(&self, store: T, store_name: &str)
    where
        T: EventSource + Clone + 'static,
    {
        if self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(store_name)
        {
            self.disconnect(store_name);
        }

        self.collector.connect(store.clone(), store_name);

        let transport = Arc::clone(&self.transport);
        let name = store_name.to_string();
        let log_events = self.log_events;
        let listener = store.open_stream(Arc::new(move |event: &StoreEvent| {
            let entry = entry_of(&name, event);
            if log_events {
                debug!(
                    store = %name,
                    event = %entry.name,
                    correlation_id = %entry.correlation_id,
                    caused_by = ?entry.caused_by,
                    "devtools event"
                );
            }
            transport.send(DevtoolsMessage::Event { entry });
        }));

        let initial_state = store.state_snapshot();
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                store_name.to_string(),
                Connection {
                    store: Box::new(store),
                    listener,
                },
            );

        self.transport.send(DevtoolsMessage::StoreConnected {
            store_name: store_name.to_string(),
            initial_state,
        });
    }

    pub fn disconnect(&self, store_name: &str) {
        let connection = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(store_name);
        if let Some(connection) = connection {
            connection.store.close_stream(connection.listener);
        }
        self.collector.disconnect(store_name);
        self.transport.send(DevtoolsMessage::StoreDisconnected {
            store_name: store_name.to_string(),
        });
    }

    pub fn destroy(&self) {
        let names: Vec<String> = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for name in names {
            self.disconnect(&name);
        }
        self.collector.destroy();
        self.transport.destroy();
    }

    pub fn get_timeline(&self, store_name: Option<&str>) -> Vec<TimelineEntry> {
        self.collector.get_timeline(store_name)
    }

    pub fn get_chain(&self, correlation_id: CorrelationId) -> Vec<TimelineEntry> {
        self.collector.get_chain(correlation_id)
    }

    pub fn get_state_history(&self, store_name: &str) -> Vec<StateSnapshot> {
        self.collector.get_state_history(store_name)
    }
}

fn entry_of(store_name: &str, event: &StoreEvent) -> TimelineEntry {
    let mut entry = TimelineEntry {
        store_name: store_name.to_string(),
        kind: if builtin::is_command_event(event.def_id) {
            EntryKind::Command
        } else {
            EntryKind::Event
        },
        name: event.name.clone(),
        data: event.data.clone(),
        correlation_id: event.correlation_id,
        caused_by: event.caused_by,
        timestamp: event.timestamp,
        state_before: None,
        state_after: None,
    };
    if event.def_id == builtin::STATE_CHANGED.id() {
        entry.state_before = event.data.get("prev").cloned();
        entry.state_after = event.data.get("next").cloned();
    }
    entry
}
