//! Command/event-driven state containers with causal tracking.
//!
//! Independent stores process commands sequentially, mutate private state,
//! and broadcast events. Every command and event carries a correlation id
//! and a `caused_by` link to whatever triggered it, propagated through a
//! task-local context so derivative work inherits its cause without any
//! explicit threading — including across stores via the event bus.
//!
//! Consumers observe a store through its event stream; the flat stream can
//! be reconstructed into cause→effect trees after the fact.

pub mod builtin;
pub mod bus;
pub mod causality;
pub mod seal;
pub mod store;
pub mod traits;
pub mod types;

pub use bus::EventBus;
pub use causality::current_cause;
pub use seal::SealedStore;
pub use store::{CommandCtx, EventCtx, Store};
pub use traits::EventSource;
pub use types::{
    Command, CommandHandlerOptions, CorrelationId, EventDef, EventId, ListenerId, StoreEvent,
    StoreId, StreamListener,
};
