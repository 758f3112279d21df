//! Trace instrumentation over causeway store streams.
//!
//! Maps the event stream onto trace spans using the causal linkage every
//! broadcast already carries: one span per command dispatch, events
//! attached to the span that caused them. Backends plug in behind
//! `TraceSink`; `TracingSink` targets the `tracing` ecosystem.

pub mod instrument;
pub mod sink;

pub use instrument::{instrument_store, TraceGuard};
pub use sink::{CommandSpan, SpanOutcome, TraceSink, TracingSink};
