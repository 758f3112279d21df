//! Bounded timeline collection across stores.
//!
//! The collector subscribes to store streams and retains a flattened,
//! globally bounded record of everything they broadcast, plus a per-store
//! history of state snapshots. Retention is a ring buffer: once
//! `max_events` is exceeded the oldest entries go first, regardless of
//! which store they came from.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use causeway_core::{builtin, CorrelationId, EventSource, ListenerId, StoreEvent};

use crate::types::{EntryKind, StateSnapshot, TimelineEntry};

struct CollectorData {
    timeline: VecDeque<TimelineEntry>,
    state_history: HashMap<String, Vec<StateSnapshot>>,
    max_events: usize,
}

struct Connection {
    store: Box<dyn EventSource>,
    listener: ListenerId,
}

/// Records store streams into a queryable, size-bounded timeline.
pub struct EventCollector {
    data: Arc<Mutex<CollectorData>>,
    connections: Mutex<HashMap<String, Connection>>,
}

impl EventCollector {
    pub fn new(max_events: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(CollectorData {
                timeline: VecDeque::new(),
                state_history: HashMap::new(),
                max_events,
            })),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Start recording a store under a name. Reconnecting under the same
    /// name replaces the prior subscription.
    pub fn connect(&self, store: impl EventSource + 'static, store_name: &str) {
        self.disconnect(store_name);

        let data = Arc::clone(&self.data);
        let name = store_name.to_string();
        let listener = store.open_stream(Arc::new(move |event: &StoreEvent| {
            record(&data, &name, event);
        }));

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
    }

    /// Stop recording a store. Entries already collected for it stay.
    pub fn disconnect(&self, store_name: &str) {
        let connection = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(store_name);
        if let Some(connection) = connection {
            connection.store.close_stream(connection.listener);
        }
    }

    /// Ordered copy of retained entries, optionally filtered by store.
    pub fn get_timeline(&self, store_name: Option<&str>) -> Vec<TimelineEntry> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        match store_name {
            Some(name) => data
                .timeline
                .iter()
                .filter(|entry| entry.store_name == name)
                .cloned()
                .collect(),
            None => data.timeline.iter().cloned().collect(),
        }
    }

    /// The entry carrying an id plus its direct effects — one hop. Walking
    /// a full tree is a fold over repeated one-hop queries (see
    /// `chain_tree`).
    pub fn get_chain(&self, correlation_id: CorrelationId) -> Vec<TimelineEntry> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.timeline
            .iter()
            .filter(|entry| {
                entry.correlation_id == correlation_id
                    || entry.caused_by == Some(correlation_id)
            })
            .cloned()
            .collect()
    }

    /// Ordered state snapshots for a store.
    pub fn get_state_history(&self, store_name: &str) -> Vec<StateSnapshot> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.state_history
            .get(store_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop all retained entries and snapshots. Subscriptions stay open.
    pub fn clear(&self) {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.timeline.clear();
        data.state_history.clear();
    }

    /// Disconnect every store and drop everything collected.
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
        self.clear();
    }
}

/// Classify and append one broadcast, evicting from the front once over
/// capacity.
fn record(data: &Mutex<CollectorData>, store_name: &str, event: &StoreEvent) {
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

    let mut snapshot = None;
    if event.def_id == builtin::STATE_CHANGED.id() {
        entry.state_before = event.data.get("prev").cloned();
        entry.state_after = event.data.get("next").cloned();
        snapshot = Some(StateSnapshot {
            store_name: store_name.to_string(),
            state: entry.state_after.clone().unwrap_or_default(),
            timestamp: event.timestamp,
            correlation_id: event.correlation_id,
        });
    }

    let mut data = data.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(snapshot) = snapshot {
        data.state_history
            .entry(store_name.to_string())
            .or_default()
            .push(snapshot);
    }
    data.timeline.push_back(entry);
    while data.timeline.len() > data.max_events {
        data.timeline.pop_front();
    }
}
