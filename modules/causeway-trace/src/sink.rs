//! Span sinks: where the mapped trace structure lands.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, error, info_span, Span};

use causeway_core::{CorrelationId, StoreEvent};

/// How a command span ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanOutcome {
    Ok,
    Failed(String),
}

/// A span opened for one command dispatch.
#[derive(Debug, Clone)]
pub struct CommandSpan {
    pub store_name: String,
    pub command_name: String,
    pub correlation_id: CorrelationId,
    pub caused_by: Option<CorrelationId>,
}

/// Pluggable backend for the instrumented stream.
pub trait TraceSink: Send + Sync {
    /// A command started: open a span keyed by its correlation id.
    fn open_span(&self, span: &CommandSpan);

    /// The command finished; close its span with the outcome.
    fn close_span(&self, correlation_id: CorrelationId, outcome: SpanOutcome);

    /// An event attached to the still-open span it was caused by.
    fn span_event(&self, parent: CorrelationId, event: &StoreEvent);

    /// An event with no open parent: record it as a standalone span,
    /// opened and closed in place.
    fn orphan_span(&self, store_name: &str, event: &StoreEvent);
}

/// Maps the stream onto `tracing` spans.
pub struct TracingSink {
    spans: Mutex<HashMap<CorrelationId, Span>>,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TracingSink {
    pub fn new() -> Self {
        Self {
            spans: Mutex::new(HashMap::new()),
        }
    }
}

impl TraceSink for TracingSink {
    fn open_span(&self, span: &CommandSpan) {
        let tracing_span = info_span!(
            "command",
            store = %span.store_name,
            command = %span.command_name,
            correlation_id = %span.correlation_id,
            caused_by = ?span.caused_by,
        );
        self.spans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(span.correlation_id, tracing_span);
    }

    fn close_span(&self, correlation_id: CorrelationId, outcome: SpanOutcome) {
        let span = self
            .spans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&correlation_id);
        if let Some(span) = span {
            span.in_scope(|| match &outcome {
                SpanOutcome::Ok => debug!("command handled"),
                SpanOutcome::Failed(message) => error!(error = %message, "command failed"),
            });
        }
    }

    fn span_event(&self, parent: CorrelationId, event: &StoreEvent) {
        let spans = self.spans.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(span) = spans.get(&parent) {
            span.in_scope(|| {
                debug!(event = %event.name, correlation_id = %event.correlation_id, "store event");
            });
        }
    }

    fn orphan_span(&self, store_name: &str, event: &StoreEvent) {
        let span = info_span!(
            "event",
            store = %store_name,
            event = %event.name,
            correlation_id = %event.correlation_id,
            caused_by = ?event.caused_by,
        );
        span.in_scope(|| debug!("store event"));
    }
}
