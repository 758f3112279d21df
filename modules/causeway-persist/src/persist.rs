//! Debounced state persistence with hydration.
//!
//! `persist_store` first hydrates the store from storage (broadcasting the
//! usual `state_changed` + `state_reset` pair, with its own writes
//! suppressed while doing so), then watches the stream for `state_changed`
//! and debounce-writes the `next` snapshot. A burst of mutations lands as
//! one write of the final state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use causeway_core::{builtin, EventSource, ListenerId, Store, StoreEvent};

use crate::storage::StateStorage;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("stored state is not valid JSON for this store: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("hydration failed: {0}")]
    Hydrate(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct PersistOptions {
    /// Storage key the state lives under.
    pub key: String,
    /// How long to wait after the last change before writing.
    pub debounce: Duration,
}

impl PersistOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            debounce: Duration::from_millis(300),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Keeps the subscription alive. `destroy` detaches the listener and stops
/// the writer; a write still pending its debounce window is dropped.
pub struct PersistHandle {
    source: Box<dyn EventSource>,
    listener: ListenerId,
    writer: JoinHandle<()>,
}

impl PersistHandle {
    pub fn destroy(self) {
        self.source.close_stream(self.listener);
        self.writer.abort();
    }
}

/// Hydrate `store` from `storage`, then persist every settled state change.
pub async fn persist_store<S>(
    store: &Store<S>,
    storage: Arc<dyn StateStorage>,
    options: PersistOptions,
) -> Result<PersistHandle, PersistError>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let hydrating = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::unbounded_channel::<Value>();

    let listener = {
        let hydrating = Arc::clone(&hydrating);
        store.open_stream(Arc::new(move |event: &StoreEvent| {
            if hydrating.load(Ordering::Acquire) {
                return;
            }
            if event.def_id != builtin::STATE_CHANGED.id() {
                return;
            }
            if let Some(next) = event.data.get("next") {
                let _ = tx.send(next.clone());
            }
        }))
    };

    let writer = tokio::spawn(write_loop(
        rx,
        Arc::clone(&storage),
        options.key.clone(),
        options.debounce,
    ));

    let stored = storage
        .get(&options.key)
        .await
        .map_err(PersistError::Storage)?;
    if let Some(raw) = stored {
        let state: S = serde_json::from_str(&raw)?;
        store
            .replace_state(Arc::new(state))
            .await
            .map_err(PersistError::Hydrate)?;
    }
    hydrating.store(false, Ordering::Release);

    Ok(PersistHandle {
        source: Box::new(store.clone()),
        listener,
        writer,
    })
}

/// Debounce loop: each received state restarts the window; when the window
/// lapses, the latest state is written. A closed channel flushes whatever
/// is pending and exits.
async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<Value>,
    storage: Arc<dyn StateStorage>,
    key: String,
    debounce: Duration,
) {
    while let Some(mut next) = rx.recv().await {
        let mut open = true;
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(newer)) => next = newer,
                Ok(None) => {
                    open = false;
                    break;
                }
                Err(_) => break,
            }
        }

        write(&storage, &key, &next).await;
        if !open {
            return;
        }
    }
}

async fn write(storage: &Arc<dyn StateStorage>, key: &str, state: &Value) {
    let serialized = match serde_json::to_string(state) {
        Ok(serialized) => serialized,
        Err(error) => {
            warn!(key, error = %error, "state serialization failed, skipping write");
            return;
        }
    };
    if let Err(error) = storage.set(key, serialized).await {
        warn!(key, error = %format!("{error:#}"), "state write failed");
    }
}
