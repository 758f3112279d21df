//! Diagnostic collection over causeway store streams.
//!
//! The collector retains a bounded, queryable log of events and state
//! snapshots; chain queries reconstruct cause→effect relationships from
//! the flat record. The devtools facade adds live forwarding of the same
//! entries over a pluggable transport.

pub mod chain;
pub mod collector;
pub mod devtools;
pub mod transport;
pub mod types;

pub use chain::{build_chains, CommandGroup};
pub use collector::EventCollector;
pub use devtools::{Devtools, DevtoolsOptions};
pub use transport::{MemoryTransport, NoopTransport, Transport};
pub use types::{DevtoolsMessage, EntryKind, StateSnapshot, TimelineEntry};
