//! The page's `postMessage` broadcast bus.

use serde_json::Value;
use tracing::trace;

use crate::error::{TransportError, TransportResult};
use crate::listener::{Inbound, Listener, ListenerId, ListenerSet};
use crate::{ResponseFuture, Transport, TransportKind};

/// Broadcast channel shared by a web page and its content scripts.
///
/// Every listener receives every posted message, including messages posted
/// by its own context, so listeners filter by destination and sender tag.
#[derive(Debug)]
pub struct WindowChannel {
    name: String,
    listeners: ListenerSet,
}

impl WindowChannel {
    /// Creates a window channel with the given log name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listeners: ListenerSet::default(),
        }
    }

    /// Number of installed listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Transport for WindowChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn post(&self, message: Value) -> TransportResult<()> {
        let listeners = self.listeners.snapshot();
        trace!(channel = %self.name, listeners = listeners.len(), "posting message");
        for listener in listeners {
            listener(Inbound {
                message: message.clone(),
                responder: None,
            });
        }
        Ok(())
    }

    fn request(&self, _message: Value) -> ResponseFuture {
        let error = TransportError::unsupported(self.name.clone(), "request/response");
        Box::pin(async move { Err(error) })
    }
}
