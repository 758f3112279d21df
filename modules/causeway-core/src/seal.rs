//! Read-only store views handed across ownership boundaries.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::store::Store;
use crate::traits::EventSource;
use crate::types::{Command, ListenerId, StoreId, StreamListener};

/// The only store surface exposed beyond the module that owns the store's
/// internals: state, queue, and stream subscription. Downstream code
/// cannot register handlers on someone else's store through this.
pub struct SealedStore<S> {
    store: Store<S>,
}

impl<S> Clone for SealedStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> SealedStore<S>
where
    S: Serialize + Send + Sync + 'static,
{
    pub(crate) fn new(store: Store<S>) -> Self {
        Self { store }
    }

    pub fn state(&self) -> Arc<S> {
        self.store.state()
    }

    pub fn queue(&self, command: Command) {
        self.store.queue(command);
    }

    pub fn open_stream(&self, listener: StreamListener) -> ListenerId {
        self.store.open_stream(listener)
    }

    pub fn close_stream(&self, listener: ListenerId) {
        self.store.close_stream(listener);
    }
}

impl<S> EventSource for SealedStore<S>
where
    S: Serialize + Send + Sync + 'static,
{
    fn store_id(&self) -> StoreId {
        self.store.store_id()
    }

    fn state_snapshot(&self) -> Value {
        self.store.state_snapshot()
    }

    fn open_stream(&self, listener: StreamListener) -> ListenerId {
        SealedStore::open_stream(self, listener)
    }

    fn close_stream(&self, listener: ListenerId) {
        SealedStore::close_stream(self, listener);
    }
}
