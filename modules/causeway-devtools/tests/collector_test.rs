//! Integration tests for the timeline collector.

use serde::Serialize;
use serde_json::{json, Value};

use causeway_core::{Command, EventDef, Store};
use causeway_devtools::{EntryKind, EventCollector};

#[derive(Debug, Serialize)]
struct Counter {
    count: i64,
}

fn counter_store() -> Store<Counter> {
    let store = Store::new(Counter { count: 0 });
    store.add_command_handler("increment", |ctx, _command| async move {
        let count = ctx.state().count;
        ctx.set_state(Counter { count: count + 1 });
        Ok(())
    });
    store
}

// =========================================================================
// Collection
// =========================================================================

#[tokio::test]
async fn collects_events_into_timeline() {
    let store = counter_store();
    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    let timeline = collector.get_timeline(None);
    assert!(!timeline.is_empty());
    assert!(timeline.iter().all(|entry| entry.store_name == "counter"));
}

#[tokio::test]
async fn classifies_command_and_event_kinds() {
    let pinged = EventDef::new("pinged");
    let store = Store::new(Counter { count: 0 });
    store.add_command_handler("ping", {
        let pinged = pinged.clone();
        move |ctx, _command| {
            let pinged = pinged.clone();
            async move {
                ctx.emit(&pinged, Value::Null);
                Ok(())
            }
        }
    });

    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "app");

    store.queue(Command::new("ping", Value::Null));
    store.flush().await;

    let timeline = collector.get_timeline(None);
    let kinds: Vec<(String, EntryKind)> = timeline
        .iter()
        .map(|entry| (entry.name.clone(), entry.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("command_started".to_string(), EntryKind::Command),
            ("pinged".to_string(), EntryKind::Event),
            ("command_handled".to_string(), EntryKind::Command),
        ]
    );
}

#[tokio::test]
async fn filters_timeline_by_store_name() {
    let store_a = counter_store();
    let store_b = counter_store();

    let collector = EventCollector::new(1000);
    collector.connect(store_a.clone(), "a");
    collector.connect(store_b.clone(), "b");

    store_a.queue(Command::new("increment", Value::Null));
    store_b.queue(Command::new("increment", Value::Null));
    store_a.flush().await;
    store_b.flush().await;

    let a_entries = collector.get_timeline(Some("a"));
    let b_entries = collector.get_timeline(Some("b"));
    assert!(!a_entries.is_empty());
    assert!(!b_entries.is_empty());
    assert!(a_entries.iter().all(|entry| entry.store_name == "a"));
    assert!(b_entries.iter().all(|entry| entry.store_name == "b"));
}

#[tokio::test]
async fn state_changed_entries_carry_before_and_after() {
    let store = counter_store();
    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    let timeline = collector.get_timeline(None);
    let change = timeline
        .iter()
        .find(|entry| entry.name == "state_changed")
        .unwrap();
    assert_eq!(change.state_before, Some(json!({ "count": 0 })));
    assert_eq!(change.state_after, Some(json!({ "count": 1 })));
}

#[tokio::test]
async fn tracks_state_history_per_store() {
    let store = counter_store();
    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    let history = collector.get_state_history("counter");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].state, json!({ "count": 1 }));
    assert_eq!(history[1].state, json!({ "count": 2 }));
}

// =========================================================================
// Chain queries
// =========================================================================

#[tokio::test]
async fn get_chain_returns_id_and_direct_effects() {
    let user_created = EventDef::new("user_created");

    #[derive(Debug, Serialize)]
    struct App {
        user: String,
    }

    let store = Store::new(App {
        user: String::new(),
    });
    store.add_command_handler("create_user", {
        let user_created = user_created.clone();
        move |ctx, command| {
            let user_created = user_created.clone();
            async move {
                let name = command.data["name"].as_str().unwrap_or("").to_string();
                ctx.set_state(App { user: name.clone() });
                ctx.emit(&user_created, json!({ "name": name }));
                Ok(())
            }
        }
    });

    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "app");

    store.queue(Command::new("create_user", json!({ "name": "Alice" })));
    store.flush().await;

    let timeline = collector.get_timeline(None);
    let started = timeline
        .iter()
        .find(|entry| entry.name == "command_started")
        .unwrap();
    let command_id = started.caused_by.unwrap();

    // Every pipeline broadcast of the command is a direct effect.
    let chain = collector.get_chain(command_id);
    let names: Vec<&str> = chain.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "command_started",
            "state_changed",
            "user_created",
            "command_handled",
        ]
    );
}

#[tokio::test]
async fn get_chain_for_leaf_event_is_a_singleton() {
    let store = counter_store();
    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    let timeline = collector.get_timeline(None);
    let handled = timeline
        .iter()
        .find(|entry| entry.name == "command_handled")
        .unwrap();

    let chain = collector.get_chain(handled.correlation_id);
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].name, "command_handled");
}

#[tokio::test]
async fn get_chain_for_unknown_id_is_empty() {
    let collector = EventCollector::new(1000);
    assert!(collector
        .get_chain(causeway_core::CorrelationId::new())
        .is_empty());
}

// =========================================================================
// Retention and lifecycle
// =========================================================================

#[tokio::test]
async fn ring_buffer_keeps_only_most_recent_entries() {
    let store = counter_store();
    let collector = EventCollector::new(5);
    collector.connect(store.clone(), "counter");

    for _ in 0..10 {
        store.queue(Command::new("increment", Value::Null));
    }
    store.flush().await;

    let timeline = collector.get_timeline(None);
    assert_eq!(timeline.len(), 5);

    // 10 commands × (started, state_changed, handled): the retained tail
    // ends with the final command's pipeline.
    let names: Vec<&str> = timeline.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names[4], "command_handled");
    let last_change = timeline
        .iter()
        .rev()
        .find(|entry| entry.name == "state_changed")
        .unwrap();
    assert_eq!(last_change.state_after, Some(json!({ "count": 10 })));
}

#[tokio::test]
async fn eviction_is_global_not_per_store() {
    let store_a = counter_store();
    let store_b = counter_store();

    let collector = EventCollector::new(3);
    collector.connect(store_a.clone(), "a");
    collector.connect(store_b.clone(), "b");

    store_a.queue(Command::new("increment", Value::Null));
    store_a.flush().await;
    store_b.queue(Command::new("increment", Value::Null));
    store_b.flush().await;

    // Store B's three entries pushed store A's out entirely.
    let timeline = collector.get_timeline(None);
    assert_eq!(timeline.len(), 3);
    assert!(timeline.iter().all(|entry| entry.store_name == "b"));
}

#[tokio::test]
async fn disconnect_stops_recording_but_keeps_entries() {
    let store = counter_store();
    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;
    let collected = collector.get_timeline(None).len();
    assert!(collected > 0);

    collector.disconnect("counter");
    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    assert_eq!(collector.get_timeline(None).len(), collected);
}

#[tokio::test]
async fn reconnect_under_same_name_replaces_subscription() {
    let store = counter_store();
    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "counter");
    collector.connect(store.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    // A duplicate subscription would double every entry.
    let names: Vec<String> = collector
        .get_timeline(None)
        .iter()
        .map(|entry| entry.name.clone())
        .collect();
    assert_eq!(
        names,
        vec!["command_started", "state_changed", "command_handled"]
    );
}

#[tokio::test]
async fn destroy_disconnects_and_clears() {
    let store = counter_store();
    let collector = EventCollector::new(1000);
    collector.connect(store.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    collector.destroy();
    assert!(collector.get_timeline(None).is_empty());
    assert!(collector.get_state_history("counter").is_empty());

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;
    assert!(collector.get_timeline(None).is_empty());
}
