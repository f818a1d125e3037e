//! RPC client.
//!
//! A client calls procedures on one target role. How the reply finds its way
//! back depends on the link:
//!
//! - [`CallStrategy::DirectCallback`]: the transport pairs requests with
//!   responses natively, so the reply is simply the response to the request.
//! - [`CallStrategy::Broadcast`]: requests and replies travel as independent
//!   messages. A transient listener is installed on the inbound transport
//!   before the request goes out and takes the first reply addressed to the
//!   client's receiving role that carries the awaited procedure name and
//!   call id.
//!
//! Every request carries a fresh call id, so concurrent calls to the same
//! procedure never steal each other's replies.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use extrpc_core::EndpointRole;
use extrpc_protocol::{
    Envelope, ProtocolError, addressed_to, decode_envelope, encode_envelope, is_reply_message,
};
use extrpc_transport::{Disposition, ListenerId, Transport, TransportError, listener};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

/// How a client correlates replies with requests.
#[derive(Debug, Clone)]
pub enum CallStrategy {
    /// The transport's own request/response pairing.
    DirectCallback {
        /// Transport requests are sent on.
        transport: Arc<dyn Transport>,
    },
    /// A transient listener matching replies by role, name and call id.
    Broadcast {
        /// Transport requests are posted on.
        outbound: Arc<dyn Transport>,
        /// Transport replies arrive on.
        inbound: Arc<dyn Transport>,
    },
}

impl CallStrategy {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectCallback { .. } => "direct-callback",
            Self::Broadcast { .. } => "broadcast",
        }
    }
}

/// Calls procedures registered on a remote server.
#[derive(Debug, Clone)]
pub struct RpcClient {
    target: EndpointRole,
    receiving: EndpointRole,
    strategy: CallStrategy,
    sender_tag: String,
    capture_return_value: bool,
    call_timeout: Option<Duration>,
}

impl RpcClient {
    /// Creates a client using the transport's native response channel.
    pub fn direct(
        target: EndpointRole,
        receiving: EndpointRole,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::new(target, receiving, CallStrategy::DirectCallback { transport })
    }

    /// Creates a client posting on `outbound` and correlating replies seen on
    /// `inbound`.
    pub fn broadcast(
        target: EndpointRole,
        receiving: EndpointRole,
        outbound: Arc<dyn Transport>,
        inbound: Arc<dyn Transport>,
    ) -> Self {
        Self::new(target, receiving, CallStrategy::Broadcast { outbound, inbound })
    }

    /// Creates a client with an explicit strategy.
    pub fn new(target: EndpointRole, receiving: EndpointRole, strategy: CallStrategy) -> Self {
        Self {
            target,
            receiving,
            strategy,
            sender_tag: format!("{receiving}-client"),
            capture_return_value: false,
            call_timeout: None,
        }
    }

    /// Builder: set the sender tag.
    pub fn with_sender_tag(mut self, tag: impl Into<String>) -> Self {
        self.sender_tag = tag.into();
        self
    }

    /// Builder: ask the relay to capture the page's reply.
    pub fn capturing_return_value(mut self, capture: bool) -> Self {
        self.capture_return_value = capture;
        self
    }

    /// Builder: bound every call. `None` waits forever.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Role written into `destinationRole`.
    pub fn target(&self) -> EndpointRole {
        self.target
    }

    /// Role written into `replyTo`.
    pub fn receiving_role(&self) -> EndpointRole {
        self.receiving
    }

    /// The correlation strategy.
    pub fn strategy(&self) -> &CallStrategy {
        &self.strategy
    }

    /// The call timeout, if any.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Calls `name` with `args` and resolves with its return value.
    pub async fn exec_remote_procedure(&self, name: &str, args: Value) -> ClientResult<Value> {
        let call_id = Uuid::new_v4().to_string();
        let request = Envelope::request(self.target, name, args)
            .with_call_id(call_id.clone())
            .with_reply_to(self.receiving)
            .with_sender(self.sender_tag.clone())
            .capturing_return_value(self.capture_return_value);
        let message = encode_envelope(&request)?;

        debug!(
            procedure = %name,
            role = %self.target,
            call_id = %call_id,
            strategy = self.strategy.name(),
            "calling remote procedure"
        );

        let exchange = self.exchange(name, &call_id, message);
        let reply = match self.call_timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange).await.map_err(|_| {
                warn!(
                    procedure = %name,
                    role = %self.target,
                    call_id = %call_id,
                    "no reply before the call timeout"
                );
                ClientError::Timeout {
                    procedure: name.to_string(),
                    role: self.target,
                    timeout,
                }
            })??,
            None => exchange.await?,
        };

        match reply.into_outcome() {
            Some(Ok(value)) => Ok(value),
            Some(Err(remote)) => {
                debug!(procedure = %name, role = %self.target, error = %remote, "remote failure");
                Err(ClientError::Remote {
                    procedure: name.to_string(),
                    role: self.target,
                    code: remote.code,
                    message: remote.message,
                })
            }
            None => Err(ProtocolError::malformed(format!(
                "expected a reply to '{name}', got a request"
            ))
            .into()),
        }
    }

    /// Typed wrapper around [`exec_remote_procedure`](Self::exec_remote_procedure).
    pub async fn call<A, R>(&self, name: &str, args: &A) -> ClientResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let serde_error = |source| ClientError::Serde {
            procedure: name.to_string(),
            source,
        };
        let args = serde_json::to_value(args).map_err(serde_error)?;
        let value = self.exec_remote_procedure(name, args).await?;
        serde_json::from_value(value).map_err(serde_error)
    }

    async fn exchange(&self, name: &str, call_id: &str, message: Value) -> ClientResult<Envelope> {
        match &self.strategy {
            CallStrategy::DirectCallback { transport } => {
                let response = transport.request(message).await?;
                let reply = decode_envelope(&response)?;
                if !reply.answers(name, Some(call_id)) {
                    warn!(
                        procedure = %name,
                        expected = %call_id,
                        received = ?reply.call_id,
                        "reply does not match the request"
                    );
                }
                Ok(reply)
            }
            CallStrategy::Broadcast { outbound, inbound } => {
                let (tx, rx) = oneshot::channel();
                let _pending =
                    PendingCall::install(inbound.clone(), self.receiving, name, call_id, tx);
                outbound.post(message)?;
                rx.await
                    .map_err(|_| ClientError::from(TransportError::no_response(inbound.name())))
            }
        }
    }
}

/// Transient reply listener of one broadcast call, removed on drop.
struct PendingCall {
    transport: Arc<dyn Transport>,
    id: ListenerId,
}

impl PendingCall {
    fn install(
        transport: Arc<dyn Transport>,
        receiving: EndpointRole,
        name: &str,
        call_id: &str,
        tx: oneshot::Sender<Envelope>,
    ) -> Self {
        let procedure = name.to_string();
        let call_id = call_id.to_string();
        let slot = Mutex::new(Some(tx));

        let id = transport.add_listener(listener(move |inbound| {
            let message = inbound.message;
            if !addressed_to(&message, receiving) || !is_reply_message(&message) {
                return Disposition::NotHandled;
            }
            let Ok(reply) = decode_envelope(&message) else {
                return Disposition::NotHandled;
            };
            if !reply.answers(&procedure, Some(&call_id)) {
                return Disposition::NotHandled;
            }

            let armed = slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            match armed {
                Some(tx) => {
                    let _ = tx.send(reply);
                    Disposition::Handled
                }
                None => Disposition::NotHandled,
            }
        }));
        Self { transport, id }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.transport.remove_listener(self.id);
    }
}
