//! Multi-hop chain reconstruction.
//!
//! The collector's `get_chain` is deliberately one hop; this is the
//! client-side fold that turns the flat timeline back into cause→effect
//! trees. Entries are grouped by causal parent (a command's whole
//! pipeline shares the command's id as `caused_by`) and groups nest
//! through the command each `command_started` record carries: its own
//! `caused_by` names the event that queued it.

use std::collections::{HashMap, HashSet};

use causeway_core::CorrelationId;

use crate::types::TimelineEntry;

/// The entries spawned by a single command dispatch (or by a rootless
/// broadcast), with the dispatches it caused nested beneath it.
#[derive(Debug, Clone)]
pub struct CommandGroup {
    /// The causal parent the group's entries share: a command's
    /// correlation id, or a rootless entry's own id.
    pub command_id: CorrelationId,
    /// Name from the group's `command_started` record, or the first
    /// entry's name for rootless groups.
    pub command_name: String,
    pub store_name: String,
    pub entries: Vec<TimelineEntry>,
    pub children: Vec<CommandGroup>,
}

/// Fold a flat timeline into causality trees, oldest root first.
pub fn build_chains(timeline: &[TimelineEntry]) -> Vec<CommandGroup> {
    if timeline.is_empty() {
        return Vec::new();
    }

    // Group by causal parent; parentless entries group under their own id.
    let mut order: Vec<CorrelationId> = Vec::new();
    let mut members: HashMap<CorrelationId, Vec<TimelineEntry>> = HashMap::new();
    let mut owner: HashMap<CorrelationId, CorrelationId> = HashMap::new();
    for entry in timeline {
        let key = entry.caused_by.unwrap_or(entry.correlation_id);
        members.entry(key).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        if let Some(group) = members.get_mut(&key) {
            group.push(entry.clone());
        }
        owner.insert(entry.correlation_id, key);
    }

    // Link each group to the group containing the event that queued its
    // command.
    let mut children_of: HashMap<CorrelationId, Vec<CorrelationId>> = HashMap::new();
    let mut roots: Vec<CorrelationId> = Vec::new();
    for key in &order {
        let entries = &members[key];
        let parent_event: Option<CorrelationId> = entries
            .iter()
            .find(|entry| entry.name == "command_started")
            .and_then(|entry| {
                serde_json::from_value(entry.data["command"]["caused_by"].clone()).ok()
            });

        let parent_key = parent_event
            .and_then(|event_id| owner.get(&event_id))
            .filter(|parent| **parent != *key)
            .copied();

        match parent_key {
            Some(parent) => children_of.entry(parent).or_default().push(*key),
            None => roots.push(*key),
        }
    }

    let mut visited = HashSet::new();
    roots
        .into_iter()
        .filter_map(|key| materialize(key, &members, &children_of, &mut visited))
        .collect()
}

fn materialize(
    key: CorrelationId,
    members: &HashMap<CorrelationId, Vec<TimelineEntry>>,
    children_of: &HashMap<CorrelationId, Vec<CorrelationId>>,
    visited: &mut HashSet<CorrelationId>,
) -> Option<CommandGroup> {
    if !visited.insert(key) {
        return None;
    }

    let entries = members.get(&key)?.clone();
    let command_name = entries
        .iter()
        .find(|entry| entry.name == "command_started")
        .and_then(|entry| entry.data["command"]["name"].as_str().map(String::from))
        .unwrap_or_else(|| entries[0].name.clone());
    let store_name = entries[0].store_name.clone();

    let children = children_of
        .get(&key)
        .map(|keys| {
            keys.iter()
                .filter_map(|child| materialize(*child, members, children_of, visited))
                .collect()
        })
        .unwrap_or_default();

    Some(CommandGroup {
        command_id: key,
        command_name,
        store_name,
        entries,
        children,
    })
}
