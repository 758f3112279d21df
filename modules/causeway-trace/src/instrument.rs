//! Stream-to-span mapping.
//!
//! Consumes the store's public stream contract only: `command_started`
//! opens a span keyed by the command's correlation id, `command_handled`
//! and `command_failed` close it, and every other broadcast either
//! attaches to the open span matching its `caused_by` or stands alone.
//! `invalid_command` and `state_reset` are deliberately not mapped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use causeway_core::{builtin, Command, CorrelationId, EventSource, ListenerId, StoreEvent};

use crate::sink::{CommandSpan, SpanOutcome, TraceSink};

/// Keeps the instrumentation attached. `detach` closes the stream and
/// force-closes any spans still open.
pub struct TraceGuard {
    source: Box<dyn EventSource>,
    listener: ListenerId,
    active: Arc<Mutex<HashSet<CorrelationId>>>,
    sink: Arc<dyn TraceSink>,
}

impl TraceGuard {
    pub fn detach(self) {
        self.source.close_stream(self.listener);
        let open: Vec<CorrelationId> = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for correlation_id in open {
            self.sink.close_span(correlation_id, SpanOutcome::Ok);
        }
    }
}

/// Attach span mapping to a store's stream.
pub fn instrument_store(
    store: impl EventSource + 'static,
    sink: Arc<dyn TraceSink>,
    store_name: impl Into<String>,
) -> TraceGuard {
    let store_name = store_name.into();
    let active: Arc<Mutex<HashSet<CorrelationId>>> = Arc::new(Mutex::new(HashSet::new()));

    let listener = {
        let sink = Arc::clone(&sink);
        let active = Arc::clone(&active);
        store.open_stream(Arc::new(move |event: &StoreEvent| {
            handle_event(&sink, &active, &store_name, event);
        }))
    };

    TraceGuard {
        source: Box::new(store),
        listener,
        active,
        sink,
    }
}

fn handle_event(
    sink: &Arc<dyn TraceSink>,
    active: &Arc<Mutex<HashSet<CorrelationId>>>,
    store_name: &str,
    event: &StoreEvent,
) {
    if event.def_id == builtin::COMMAND_STARTED.id() {
        let Some(command) = carried_command(event) else {
            return;
        };
        let Some(correlation_id) = command.correlation_id else {
            return;
        };
        sink.open_span(&CommandSpan {
            store_name: store_name.to_string(),
            command_name: command.name,
            correlation_id,
            caused_by: command.caused_by,
        });
        active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(correlation_id);
        return;
    }

    if event.def_id == builtin::COMMAND_HANDLED.id() {
        if let Some(correlation_id) = carried_command_id(event) {
            if remove_active(active, correlation_id) {
                sink.close_span(correlation_id, SpanOutcome::Ok);
            }
        }
        return;
    }

    if event.def_id == builtin::COMMAND_FAILED.id() {
        if let Some(correlation_id) = carried_command_id(event) {
            if remove_active(active, correlation_id) {
                let message = event.data["error"].as_str().unwrap_or("unknown").to_string();
                sink.close_span(correlation_id, SpanOutcome::Failed(message));
            }
        }
        return;
    }

    if event.def_id == builtin::INVALID_COMMAND.id() || event.def_id == builtin::STATE_RESET.id() {
        return;
    }

    let parent = event.caused_by.filter(|cause| {
        active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(cause)
    });
    match parent {
        Some(parent) => sink.span_event(parent, event),
        None => sink.orphan_span(store_name, event),
    }
}

fn carried_command(event: &StoreEvent) -> Option<Command> {
    serde_json::from_value(event.data.get("command")?.clone()).ok()
}

fn carried_command_id(event: &StoreEvent) -> Option<CorrelationId> {
    carried_command(event)?.correlation_id
}

fn remove_active(active: &Arc<Mutex<HashSet<CorrelationId>>>, id: CorrelationId) -> bool {
    active
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&id)
}
