//! Instrumentation tests against a recording sink.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{json, Value};

use causeway_core::{Command, CorrelationId, EventBus, EventDef, Store, StoreEvent};
use causeway_trace::{instrument_store, CommandSpan, SpanOutcome, TraceSink, TracingSink};

/// What the sink was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
enum SinkCall {
    Open {
        store: String,
        command: String,
        correlation_id: CorrelationId,
        caused_by: Option<CorrelationId>,
    },
    Close {
        correlation_id: CorrelationId,
        outcome: SpanOutcome,
    },
    Attach {
        parent: CorrelationId,
        event: String,
    },
    Orphan {
        store: String,
        event: String,
    },
}

#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl TraceSink for RecordingSink {
    fn open_span(&self, span: &CommandSpan) {
        self.calls.lock().unwrap().push(SinkCall::Open {
            store: span.store_name.clone(),
            command: span.command_name.clone(),
            correlation_id: span.correlation_id,
            caused_by: span.caused_by,
        });
    }

    fn close_span(&self, correlation_id: CorrelationId, outcome: SpanOutcome) {
        self.calls.lock().unwrap().push(SinkCall::Close {
            correlation_id,
            outcome,
        });
    }

    fn span_event(&self, parent: CorrelationId, event: &StoreEvent) {
        self.calls.lock().unwrap().push(SinkCall::Attach {
            parent,
            event: event.name.clone(),
        });
    }

    fn orphan_span(&self, store_name: &str, event: &StoreEvent) {
        self.calls.lock().unwrap().push(SinkCall::Orphan {
            store: store_name.to_string(),
            event: event.name.clone(),
        });
    }
}

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
// Span lifecycle
// =========================================================================

#[tokio::test]
async fn command_dispatch_opens_and_closes_one_span() {
    let sink = Arc::new(RecordingSink::default());
    let store = counter_store();
    let guard = instrument_store(store.clone(), sink.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    let calls = sink.calls();
    let opens: Vec<&SinkCall> = calls
        .iter()
        .filter(|call| matches!(call, SinkCall::Open { .. }))
        .collect();
    let closes: Vec<&SinkCall> = calls
        .iter()
        .filter(|call| matches!(call, SinkCall::Close { .. }))
        .collect();
    assert_eq!(opens.len(), 1);
    assert_eq!(closes.len(), 1);

    let SinkCall::Open {
        store: store_name,
        command,
        correlation_id,
        caused_by,
    } = opens[0]
    else {
        unreachable!()
    };
    assert_eq!(store_name, "counter");
    assert_eq!(command, "increment");
    assert!(caused_by.is_none());

    let SinkCall::Close {
        correlation_id: closed,
        outcome,
    } = closes[0]
    else {
        unreachable!()
    };
    assert_eq!(closed, correlation_id);
    assert_eq!(*outcome, SpanOutcome::Ok);

    guard.detach();
}

#[tokio::test]
async fn state_changed_attaches_to_the_open_command_span() {
    let sink = Arc::new(RecordingSink::default());
    let store = counter_store();
    let guard = instrument_store(store.clone(), sink.clone(), "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;

    let calls = sink.calls();
    let SinkCall::Open { correlation_id, .. } = &calls[0] else {
        panic!("expected the span to open first, got {calls:?}");
    };
    assert_eq!(
        calls[1],
        SinkCall::Attach {
            parent: *correlation_id,
            event: "state_changed".to_string(),
        }
    );

    guard.detach();
}

#[tokio::test]
async fn custom_emission_attaches_to_its_command() {
    let pinged = EventDef::new("pinged");
    let store = Store::new(Counter { count: 0 });
    store.add_command_handler("ping", {
        let pinged = pinged.clone();
        move |ctx, _command| {
            let pinged = pinged.clone();
            async move {
                ctx.emit(&pinged, json!({ "n": 1 }));
                Ok(())
            }
        }
    });

    let sink = Arc::new(RecordingSink::default());
    let guard = instrument_store(store.clone(), sink.clone(), "app");

    store.queue(Command::new("ping", Value::Null));
    store.flush().await;

    let calls = sink.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        SinkCall::Attach { event, .. } if event == "pinged"
    )));

    guard.detach();
}

#[tokio::test]
async fn failed_command_marks_the_span_failed() {
    let store = Store::new(Counter { count: 0 });
    store.add_command_handler("explode", |_ctx, _command| async move {
        anyhow::bail!("oops")
    });

    let sink = Arc::new(RecordingSink::default());
    let guard = instrument_store(store.clone(), sink.clone(), "app");

    store.queue(Command::new("explode", Value::Null));
    store.flush().await;

    let calls = sink.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        SinkCall::Close { outcome: SpanOutcome::Failed(message), .. } if message.contains("oops")
    )));

    guard.detach();
}

#[tokio::test]
async fn invalid_commands_are_not_mapped() {
    let sink = Arc::new(RecordingSink::default());
    let store: Store<Value> = Store::new(json!({}));
    let guard = instrument_store(store.clone(), sink.clone(), "app");

    store.queue(Command::new("ghost", Value::Null));
    store.flush().await;

    assert!(sink.calls().is_empty());
    guard.detach();
}

#[tokio::test]
async fn rootless_state_change_becomes_a_standalone_span() {
    let sink = Arc::new(RecordingSink::default());
    let store = counter_store();
    let guard = instrument_store(store.clone(), sink.clone(), "counter");

    store
        .replace_state(Arc::new(Counter { count: 9 }))
        .await
        .unwrap();

    // state_changed has no open parent; state_reset is skipped entirely.
    assert_eq!(
        sink.calls(),
        vec![SinkCall::Orphan {
            store: "counter".to_string(),
            event: "state_changed".to_string(),
        }]
    );

    guard.detach();
}

#[tokio::test]
async fn detach_closes_spans_left_open() {
    let store = Store::new(Counter { count: 0 });
    // A handler that parks until we let it finish, holding its span open.
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Arc::new(Mutex::new(Some(release_rx)));
    store.add_command_handler("park", move |_ctx, _command| {
        let release_rx = Arc::clone(&release_rx);
        async move {
            let receiver = release_rx.lock().unwrap().take();
            if let Some(receiver) = receiver {
                let _ = receiver.await;
            }
            Ok(())
        }
    });

    let sink = Arc::new(RecordingSink::default());
    let guard = instrument_store(store.clone(), sink.clone(), "app");

    store.queue(Command::new("park", Value::Null));
    tokio::task::yield_now().await;

    // The span opened but never closed; detaching closes it.
    guard.detach();
    let calls = sink.calls();
    assert!(calls.iter().any(|call| matches!(call, SinkCall::Open { .. })));
    assert!(calls
        .iter()
        .any(|call| matches!(call, SinkCall::Close { outcome: SpanOutcome::Ok, .. })));

    let _ = release_tx.send(());
    store.flush().await;
}

// =========================================================================
// Cross-store chains
// =========================================================================

#[tokio::test]
async fn cross_store_reaction_opens_a_child_keyed_span() {
    let user_created = EventDef::new("user_created");

    #[derive(Debug, Serialize)]
    struct App {
        user: String,
    }

    let store_a = Store::new(App {
        user: String::new(),
    });
    let store_b = Store::new(App {
        user: String::new(),
    });
    store_a.add_command_handler("create_user", {
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
    store_b.add_command_handler("greet", |ctx, command| async move {
        let name = command.data["name"].as_str().unwrap_or("").to_string();
        ctx.set_state(App { user: name });
        Ok(())
    });

    let sink_a = Arc::new(RecordingSink::default());
    let sink_b = Arc::new(RecordingSink::default());
    let guard_a = instrument_store(store_a.clone(), sink_a.clone(), "a");
    let guard_b = instrument_store(store_b.clone(), sink_b.clone(), "b");

    let bus = EventBus::new();
    bus.connect(store_a.clone());
    bus.connect(store_b.clone());
    {
        let store_b = store_b.clone();
        bus.on(&user_created, move |event| {
            store_b.queue(Command::new("greet", event.data.clone()));
        });
    }

    store_a.queue(Command::new("create_user", json!({ "name": "Alice" })));
    store_a.flush().await;
    store_b.flush().await;

    // B's span carries the causal link back to A's user_created event.
    let calls_b = sink_b.calls();
    let SinkCall::Open {
        command, caused_by, ..
    } = &calls_b[0]
    else {
        panic!("expected an open span on store b, got {calls_b:?}");
    };
    assert_eq!(command, "greet");
    assert!(caused_by.is_some());

    guard_a.detach();
    guard_b.detach();
}

// =========================================================================
// TracingSink smoke test
// =========================================================================

#[tokio::test]
async fn tracing_sink_runs_under_a_subscriber() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let sink = Arc::new(TracingSink::new());
    let store = counter_store();
    let trace = instrument_store(store.clone(), sink, "counter");

    store.queue(Command::new("increment", Value::Null));
    store.flush().await;
    store
        .replace_state(Arc::new(Counter { count: 7 }))
        .await
        .unwrap();

    trace.detach();
}
