//! The store engine: a serialized command queue with an event-broadcast
//! pipeline.
//!
//! Each store owns one state value and drains its queue strictly one
//! command at a time on a spawned task, even when handlers suspend. A
//! command's pipeline is: `command_started` → handler → `state_changed`
//! (if the state pointer moved) → buffered emissions → `command_handled`.
//! Handler failures are converted to `command_failed` events and never
//! reach the caller of `queue`.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::warn;

use crate::builtin;
use crate::causality::{current_cause, with_cause};
use crate::seal::SealedStore;
use crate::traits::EventSource;
use crate::types::{
    Command, CommandHandlerOptions, CorrelationId, EventDef, EventId, ListenerId, StoreEvent,
    StoreId, StreamListener,
};

type CommandHandlerFn<S> =
    dyn Fn(CommandCtx<S>, Command) -> BoxFuture<'static, Result<()>> + Send + Sync;
type EventHandlerFn<S> =
    dyn Fn(EventCtx<S>, StoreEvent) -> BoxFuture<'static, Result<()>> + Send + Sync;

struct HandlerEntry<S> {
    handler: Arc<CommandHandlerFn<S>>,
    options: CommandHandlerOptions,
}

impl<S> Clone for HandlerEntry<S> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            options: self.options,
        }
    }
}

/// An event buffered by `CommandCtx::emit`, broadcast after the handler
/// returns.
struct PendingEvent {
    def_id: EventId,
    name: String,
    data: Value,
}

struct QueueState {
    pending: VecDeque<Command>,
    processing: bool,
    flush_waiters: Vec<oneshot::Sender<()>>,
}

struct StoreInner<S> {
    id: StoreId,
    state: RwLock<Arc<S>>,
    command_handlers: RwLock<HashMap<String, HandlerEntry<S>>>,
    event_handlers: RwLock<HashMap<EventId, Vec<Arc<EventHandlerFn<S>>>>>,
    listeners: Mutex<Vec<(ListenerId, StreamListener)>>,
    next_listener: AtomicU64,
    queue: Mutex<QueueState>,
}

/// An isolated state machine: one state value, command handlers keyed by
/// name (last registration wins), event handlers keyed by identity, and a
/// FIFO queue. Cheap to clone; clones share the same store.
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Store<S>
where
    S: Serialize + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id: StoreId::next(),
                state: RwLock::new(Arc::new(initial)),
                command_handlers: RwLock::new(HashMap::new()),
                event_handlers: RwLock::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                queue: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    processing: false,
                    flush_waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> Arc<S> {
        Arc::clone(&self.inner.state.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Register the handler for a command name. Last registration wins.
    pub fn add_command_handler<F, Fut>(&self, name: impl Into<String>, handler: F) -> &Self
    where
        F: Fn(CommandCtx<S>, Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_command_handler_with(name, handler, CommandHandlerOptions::default())
    }

    /// Like `add_command_handler`, with options.
    pub fn add_command_handler_with<F, Fut>(
        &self,
        name: impl Into<String>,
        handler: F,
        options: CommandHandlerOptions,
    ) -> &Self
    where
        F: Fn(CommandCtx<S>, Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Arc<CommandHandlerFn<S>> =
            Arc::new(move |ctx, command| Box::pin(handler(ctx, command)));
        self.inner
            .command_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), HandlerEntry { handler, options });
        self
    }

    /// Append a reactive handler for an event kind. Handlers run in
    /// registration order during broadcast and may queue further commands.
    pub fn add_event_handler<F, Fut>(&self, def: &EventDef, handler: F) -> &Self
    where
        F: Fn(EventCtx<S>, StoreEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Arc<EventHandlerFn<S>> =
            Arc::new(move |ctx, event| Box::pin(handler(ctx, event)));
        self.inner
            .event_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(def.id())
            .or_default()
            .push(handler);
        self
    }

    /// Accept a command: assign its correlation id, fill in its causal
    /// parent from the ambient context unless pinned explicitly, and start
    /// draining if idle. Never blocks the caller.
    pub fn queue(&self, mut command: Command) {
        command.correlation_id = Some(CorrelationId::new());
        if command.caused_by.is_none() {
            command.caused_by = current_cause();
        }

        let start_drain = {
            let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.pending.push_back(command);
            if queue.processing {
                false
            } else {
                queue.processing = true;
                true
            }
        };

        if start_drain {
            let store = self.clone();
            tokio::spawn(async move { store.drain().await });
        }
    }

    /// Resolves once the queue is fully idle: no pending commands and no
    /// handler in flight. Immediate if already idle.
    pub async fn flush(&self) {
        let receiver = {
            let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            if !queue.processing && queue.pending.is_empty() {
                return;
            }
            let (sender, receiver) = oneshot::channel();
            queue.flush_waiters.push(sender);
            receiver
        };
        let _ = receiver.await;
    }

    pub fn open_stream(&self, listener: StreamListener) -> ListenerId {
        let id = ListenerId::from_raw(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    pub fn close_stream(&self, listener: ListenerId) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _)| *id != listener);
    }

    /// Substitute the state wholesale, e.g. when hydrating from external
    /// storage. No-op when `next` is the same allocation as the current
    /// state; otherwise broadcasts one `state_changed` and one
    /// `state_reset` so consumers can tell hydration from ordinary
    /// mutation.
    pub async fn replace_state(&self, next: Arc<S>) -> Result<()> {
        let prev = {
            let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
            if Arc::ptr_eq(&state, &next) {
                return Ok(());
            }
            std::mem::replace(&mut *state, Arc::clone(&next))
        };

        let prev_value = serde_json::to_value(&*prev)?;
        let next_value = serde_json::to_value(&*next)?;
        self.broadcast(
            &builtin::STATE_CHANGED,
            json!({ "prev": prev_value, "next": next_value }),
        )
        .await?;
        self.broadcast(&builtin::STATE_RESET, Value::Null).await
    }

    /// Read-only view: state, queue, and stream subscription — no handler
    /// registration.
    pub fn seal(&self) -> SealedStore<S> {
        SealedStore::new(self.clone())
    }

    async fn drain(&self) {
        loop {
            let command = {
                let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(command) = queue.pending.pop_front() {
                    command
                } else {
                    queue.processing = false;
                    let waiters = std::mem::take(&mut queue.flush_waiters);
                    drop(queue);
                    for waiter in waiters {
                        let _ = waiter.send(());
                    }
                    return;
                }
            };
            self.process(command).await;
        }
    }

    async fn process(&self, command: Command) {
        let correlation_id = command.correlation_id.unwrap_or_else(CorrelationId::new);

        let entry = self
            .inner
            .command_handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&command.name)
            .cloned();

        let Some(entry) = entry else {
            let report = self.broadcast(&builtin::INVALID_COMMAND, json!({ "command": command }));
            if let Err(error) = with_cause(correlation_id, report).await {
                warn!(command = %command.name, error = %format!("{error:#}"), "invalid_command broadcast failed");
            }
            return;
        };

        let outcome = with_cause(correlation_id, self.run_pipeline(&entry, &command)).await;

        if let Err(error) = outcome {
            let report = self.broadcast(
                &builtin::COMMAND_FAILED,
                json!({ "command": command, "error": format!("{error:#}") }),
            );
            if let Err(report_error) = with_cause(correlation_id, report).await {
                warn!(command = %command.name, error = %format!("{report_error:#}"), "command_failed broadcast failed");
            }
        }
    }

    /// The broadcast pipeline for one command. Any failure, whether the
    /// handler itself or an event handler reached through one of the
    /// broadcasts, aborts the remaining steps and surfaces as this
    /// command's failure.
    async fn run_pipeline(&self, entry: &HandlerEntry<S>, command: &Command) -> Result<()> {
        self.broadcast(&builtin::COMMAND_STARTED, json!({ "command": command }))
            .await?;

        let prev = self.state();
        let ctx = CommandCtx {
            store: self.clone(),
            emitted: Arc::new(Mutex::new(Vec::new())),
        };
        (entry.handler)(ctx.clone(), command.clone()).await?;

        // state_changed is guaranteed to precede any emission from the same
        // handler invocation.
        let next = self.state();
        if !Arc::ptr_eq(&prev, &next) {
            let prev_value = serde_json::to_value(&*prev)?;
            let next_value = serde_json::to_value(&*next)?;
            self.broadcast(
                &builtin::STATE_CHANGED,
                json!({ "prev": prev_value, "next": next_value }),
            )
            .await?;
        }

        for pending in ctx.take_emitted() {
            self.broadcast_raw(pending.def_id, pending.name, pending.data)
                .await?;
        }

        self.broadcast(&builtin::COMMAND_HANDLED, json!({ "command": command }))
            .await?;

        if entry.options.notify {
            let notify = EventDef::new(format!("{}:handled", command.name));
            self.broadcast(&notify, json!({ "command": command })).await?;
        }

        Ok(())
    }

    async fn broadcast(&self, def: &EventDef, data: Value) -> Result<()> {
        self.broadcast_raw(def.id(), def.name().to_string(), data)
            .await
    }

    /// Mint the event and fan it out: stream listeners synchronously in
    /// registration order, then matching event handlers awaited in order,
    /// all under a causal scope set to the event's own id.
    async fn broadcast_raw(&self, def_id: EventId, name: String, data: Value) -> Result<()> {
        let event = StoreEvent {
            def_id,
            name,
            data,
            timestamp: Utc::now(),
            correlation_id: CorrelationId::new(),
            caused_by: current_cause(),
        };
        with_cause(event.correlation_id, self.deliver(event)).await
    }

    async fn deliver(&self, event: StoreEvent) -> Result<()> {
        let listeners: Vec<StreamListener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }

        let handlers = self
            .inner
            .event_handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.def_id)
            .cloned();
        if let Some(handlers) = handlers {
            let ctx = EventCtx {
                store: self.clone(),
            };
            for handler in handlers {
                handler(ctx.clone(), event.clone()).await?;
            }
        }

        Ok(())
    }
}

impl<S> EventSource for Store<S>
where
    S: Serialize + Send + Sync + 'static,
{
    fn store_id(&self) -> StoreId {
        self.inner.id
    }

    fn state_snapshot(&self) -> Value {
        serde_json::to_value(&*self.state()).unwrap_or(Value::Null)
    }

    fn open_stream(&self, listener: StreamListener) -> ListenerId {
        Store::open_stream(self, listener)
    }

    fn close_stream(&self, listener: ListenerId) {
        Store::close_stream(self, listener)
    }
}

/// Handler-side view of a store while a command runs.
pub struct CommandCtx<S> {
    store: Store<S>,
    emitted: Arc<Mutex<Vec<PendingEvent>>>,
}

impl<S> Clone for CommandCtx<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            emitted: Arc::clone(&self.emitted),
        }
    }
}

impl<S> CommandCtx<S>
where
    S: Serialize + Send + Sync + 'static,
{
    /// Current state. Reflects earlier `set_state` calls from the same
    /// handler invocation.
    pub fn state(&self) -> Arc<S> {
        self.store.state()
    }

    /// Replace the state immediately. Mutations made before a later
    /// failure in the same handler persist — there is no rollback; the
    /// contract is "commit what ran".
    pub fn set_state(&self, next: S) {
        let mut state = self
            .store
            .inner
            .state
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *state = Arc::new(next);
    }

    /// Declare an event. Buffered until the handler returns, then
    /// broadcast after `state_changed`, in emission order.
    pub fn emit(&self, def: &EventDef, data: Value) {
        self.emitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PendingEvent {
                def_id: def.id(),
                name: def.name().to_string(),
                data,
            });
    }

    fn take_emitted(&self) -> Vec<PendingEvent> {
        std::mem::take(&mut *self.emitted.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Event-handler-side view of a store: a state snapshot and the queue.
pub struct EventCtx<S> {
    store: Store<S>,
}

impl<S> Clone for EventCtx<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> EventCtx<S>
where
    S: Serialize + Send + Sync + 'static,
{
    pub fn state(&self) -> Arc<S> {
        self.store.state()
    }

    /// Queue a derivative command on the same store. It inherits the
    /// triggering event's id as its causal parent.
    pub fn queue(&self, command: Command) {
        self.store.queue(command);
    }
}
