//! Task-local causal context.
//!
//! The engine tracks "what is currently being processed" in a task-local
//! slot rather than a shared mutable pointer. Scopes nest like a call
//! stack: processing a command sets its id, each broadcast shadows it with
//! the event's id for the duration of listener and handler dispatch, and
//! the outer value is restored when the nested future completes. Anything
//! that calls `queue` from inside one of those scopes, including on a
//! different store, inherits the innermost id as its causal parent.

use std::future::Future;

use crate::types::CorrelationId;

tokio::task_local! {
    static CURRENT_CAUSE: Option<CorrelationId>;
}

/// The correlation id of the command or event currently being processed on
/// this task, if any.
pub fn current_cause() -> Option<CorrelationId> {
    CURRENT_CAUSE.try_with(|cause| *cause).ok().flatten()
}

/// Run `fut` with `cause` as the ambient causal parent.
pub(crate) async fn with_cause<F: Future>(cause: CorrelationId, fut: F) -> F::Output {
    CURRENT_CAUSE.scope(Some(cause), fut).await
}
