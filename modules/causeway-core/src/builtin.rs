//! Builtin lifecycle events broadcast by every store.

use std::sync::LazyLock;

use crate::types::{EventDef, EventId};

/// State replaced by a handler or `replace_state`. Data: `{prev, next}`.
pub static STATE_CHANGED: LazyLock<EventDef> = LazyLock::new(|| EventDef::new("state_changed"));

/// A command was dequeued and is about to run. Data: `{command}`.
pub static COMMAND_STARTED: LazyLock<EventDef> = LazyLock::new(|| EventDef::new("command_started"));

/// A command's full pipeline completed. Data: `{command}`.
pub static COMMAND_HANDLED: LazyLock<EventDef> = LazyLock::new(|| EventDef::new("command_handled"));

/// A command was dequeued with no registered handler. Data: `{command}`.
pub static INVALID_COMMAND: LazyLock<EventDef> = LazyLock::new(|| EventDef::new("invalid_command"));

/// A command's handler (or a handler it triggered) failed. Data:
/// `{command, error}`.
pub static COMMAND_FAILED: LazyLock<EventDef> = LazyLock::new(|| EventDef::new("command_failed"));

/// State was substituted wholesale via `replace_state`, e.g. hydration.
/// Always preceded by a `state_changed` carrying the actual transition.
pub static STATE_RESET: LazyLock<EventDef> = LazyLock::new(|| EventDef::new("state_reset"));

/// True for the command-lifecycle events. Collectors use this to classify
/// timeline entries as command-kind vs event-kind.
pub fn is_command_event(def_id: EventId) -> bool {
    def_id == COMMAND_STARTED.id()
        || def_id == COMMAND_HANDLED.id()
        || def_id == INVALID_COMMAND.id()
        || def_id == COMMAND_FAILED.id()
}
