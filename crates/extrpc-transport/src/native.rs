//! Native extension messaging (`runtime.sendMessage`, `tabs.sendMessage`).

use extrpc_core::ResponsePolicy;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{TransportError, TransportResult};
use crate::listener::{Disposition, Inbound, Listener, ListenerId, ListenerSet, Responder};
use crate::{ResponseFuture, Transport, TransportKind};

/// Addressed channel toward one receiving context.
///
/// Every listener receives the message along with a clone of one shared
/// [`Responder`]. After all listeners return, the channel applies its
/// [`ResponsePolicy`]:
///
/// - `RequiresAsyncSignal`: the responder is closed unless some listener
///   returned [`Disposition::RespondLater`].
/// - `OpenWhileHeld`: the responder stays usable for as long as a listener
///   keeps a clone of it.
#[derive(Debug)]
pub struct NativeChannel {
    name: String,
    policy: ResponsePolicy,
    listeners: ListenerSet,
}

impl NativeChannel {
    /// Creates a native channel with the given log name and response policy.
    pub fn new(name: impl Into<String>, policy: ResponsePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            listeners: ListenerSet::default(),
        }
    }

    /// Response policy applied after delivery.
    pub fn policy(&self) -> ResponsePolicy {
        self.policy
    }

    /// Number of installed listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn deliver(&self, message: Value, responder: &Responder) -> TransportResult<()> {
        let listeners = self.listeners.snapshot();
        if listeners.is_empty() {
            return Err(TransportError::no_receiver(self.name.clone()));
        }

        let mut respond_later = false;
        for listener in listeners {
            let disposition = listener(Inbound {
                message: message.clone(),
                responder: Some(responder.clone()),
            });
            respond_later |= disposition == Disposition::RespondLater;
        }

        trace!(channel = %self.name, respond_later, "native message delivered");
        if self.policy == ResponsePolicy::RequiresAsyncSignal && !respond_later {
            responder.close();
        }
        Ok(())
    }
}

impl Transport for NativeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn post(&self, message: Value) -> TransportResult<()> {
        self.deliver(message, &Responder::detached())
    }

    fn request(&self, message: Value) -> ResponseFuture {
        let (responder, rx) = Responder::pair();
        let delivered = self.deliver(message, &responder);
        drop(responder);

        let channel = self.name.clone();
        Box::pin(async move {
            delivered?;
            rx.await.map_err(|_| {
                debug!(channel = %channel, "response channel closed without a response");
                TransportError::no_response(channel)
            })
        })
    }
}
