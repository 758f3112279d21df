//! Transports carry devtools messages to whatever frontend is attached.

use std::sync::Mutex;

use crate::types::DevtoolsMessage;

pub trait Transport: Send + Sync {
    fn send(&self, message: DevtoolsMessage);

    /// Release transport resources. Default: nothing to release.
    fn destroy(&self) {}
}

/// Buffers messages in memory. For tests and headless capture.
#[derive(Default)]
pub struct MemoryTransport {
    messages: Mutex<Vec<DevtoolsMessage>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<DevtoolsMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: DevtoolsMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }

    fn destroy(&self) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Discards everything. For running the collector with no frontend.
pub struct NoopTransport;

impl Transport for NoopTransport {
    fn send(&self, _message: DevtoolsMessage) {}
}
