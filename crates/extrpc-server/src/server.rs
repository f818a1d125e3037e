//! RPC server bound to one endpoint role.

use std::sync::{Arc, Mutex, MutexGuard};

use extrpc_core::EndpointRole;
use extrpc_protocol::{
    Envelope, addressed_to, decode_envelope, encode_envelope, is_reply_message, sender_of,
};
use extrpc_transport::{Disposition, Inbound, ListenerId, Responder, Transport, listener};
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::registry::ProcedureRegistry;

/// Serves the procedures of one registry to clients addressing its role.
///
/// A server does nothing until [`listen`](Self::listen) installs its single
/// transport listener. Accepted requests are dispatched on spawned tasks and
/// answered through the request's native responder when it has one, or
/// posted on the reply transport addressed to the request's `replyTo`.
#[derive(Debug)]
pub struct RpcServer {
    transport: Arc<dyn Transport>,
    intake: Arc<Intake>,
    listener: Mutex<Option<ListenerId>>,
}

/// State shared between the listener and the dispatch tasks.
#[derive(Debug)]
struct Intake {
    role: EndpointRole,
    sender_tag: String,
    registry: Arc<ProcedureRegistry>,
    reply_transport: Arc<dyn Transport>,
}

impl RpcServer {
    /// Creates a server listening on `transport` once started.
    pub fn new(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        registry: ProcedureRegistry,
    ) -> Self {
        let reply_transport = config
            .reply_transport
            .unwrap_or_else(|| transport.clone());
        Self {
            transport,
            intake: Arc::new(Intake {
                role: config.role,
                sender_tag: config.sender_tag,
                registry: Arc::new(registry),
                reply_transport,
            }),
            listener: Mutex::new(None),
        }
    }

    /// The role this server accepts requests for.
    pub fn role(&self) -> EndpointRole {
        self.intake.role
    }

    /// The procedures this server exposes.
    pub fn registry(&self) -> &ProcedureRegistry {
        &self.intake.registry
    }

    /// Returns true once `listen` succeeded and `stop` was not called.
    pub fn is_listening(&self) -> bool {
        self.lock_listener().is_some()
    }

    /// Installs the transport listener.
    ///
    /// Must be called from within a tokio runtime; dispatch tasks are spawned
    /// on it.
    pub fn listen(&self) -> ServerResult<()> {
        let mut slot = self.lock_listener();
        if slot.is_some() {
            return Err(ServerError::already_listening(self.intake.role));
        }
        let runtime = Handle::try_current().map_err(|_| ServerError::NoRuntime)?;

        let intake = self.intake.clone();
        let id = self.transport.add_listener(listener(move |inbound| {
            intake.accept(inbound, &runtime)
        }));
        *slot = Some(id);

        info!(
            role = %self.intake.role,
            transport = %self.transport.name(),
            procedures = ?self.intake.registry.names(),
            "RPC server listening"
        );
        Ok(())
    }

    /// Removes the transport listener. Returns false if not listening.
    pub fn stop(&self) -> bool {
        match self.lock_listener().take() {
            Some(id) => {
                debug!(role = %self.intake.role, "RPC server stopped");
                self.transport.remove_listener(id)
            }
            None => false,
        }
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<ListenerId>> {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Intake {
    /// Intake filtering. Anything not returning `RespondLater` means this
    /// server will not respond.
    fn accept(self: &Arc<Self>, inbound: Inbound, runtime: &Handle) -> Disposition {
        let Inbound { message, responder } = inbound;

        if !addressed_to(&message, self.role) {
            return Disposition::NotHandled;
        }
        if is_reply_message(&message) {
            trace!(role = %self.role, "ignoring reply addressed to this role");
            return Disposition::NotHandled;
        }
        if sender_of(&message) == Some(self.sender_tag.as_str()) {
            return Disposition::NotHandled;
        }

        let request = match decode_envelope(&message) {
            Ok(request) => request,
            Err(e) => {
                warn!(role = %self.role, error = %e, "dropping malformed request");
                return Disposition::NotHandled;
            }
        };

        debug!(
            role = %self.role,
            procedure = %request.procedure_name,
            call_id = ?request.call_id,
            "accepted request"
        );
        let intake = self.clone();
        runtime.spawn(async move { intake.serve(request, responder).await });
        Disposition::RespondLater
    }

    async fn serve(self: Arc<Self>, request: Envelope, responder: Option<Responder>) {
        let outcome = self
            .registry
            .dispatch(&request.procedure_name, request.args())
            .await
            .map_err(|e| {
                warn!(
                    role = %self.role,
                    procedure = %request.procedure_name,
                    error = %e,
                    "procedure call failed"
                );
                e.to_remote()
            });

        let destination = request.reply_to.unwrap_or(self.role);
        let reply = request
            .reply_with(destination, outcome)
            .with_sender(self.sender_tag.clone());
        let message = match encode_envelope(&reply) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    role = %self.role,
                    procedure = %request.procedure_name,
                    error = %e,
                    "failed to encode reply"
                );
                return;
            }
        };

        match responder {
            Some(responder) if responder.is_open() => {
                if let Err(e) = responder.respond(message) {
                    warn!(
                        role = %self.role,
                        procedure = %request.procedure_name,
                        error = %e,
                        "caller stopped waiting for the reply"
                    );
                }
            }
            _ => self.post_reply(&request, message),
        }
    }

    fn post_reply(&self, request: &Envelope, message: serde_json::Value) {
        if request.reply_to.is_none() {
            warn!(
                role = %self.role,
                procedure = %request.procedure_name,
                "request has neither a response channel nor a replyTo role, dropping reply"
            );
            return;
        }
        if let Err(e) = self.reply_transport.post(message) {
            warn!(
                role = %self.role,
                procedure = %request.procedure_name,
                transport = %self.reply_transport.name(),
                error = %e,
                "failed to post reply"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extrpc_core::ResponsePolicy;
    use extrpc_protocol::{ErrorCode, decode_envelope};
    use extrpc_transport::{NativeChannel, WindowChannel};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn registry_with_get() -> ProcedureRegistry {
        let mut registry = ProcedureRegistry::new();
        registry
            .register_promise_procedure("get", |args: Value| async move {
                Ok(json!({"key": args["key"], "value": 42}))
            })
            .unwrap();
        registry
    }

    fn native(policy: ResponsePolicy) -> Arc<NativeChannel> {
        Arc::new(NativeChannel::new("runtime", policy))
    }

    fn request(role: EndpointRole, name: &str, args: Value) -> Value {
        encode_envelope(
            &Envelope::request(role, name, args)
                .with_call_id("call-1")
                .with_reply_to(EndpointRole::WebPage),
        )
        .unwrap()
    }

    /// Collects every message posted on a window.
    fn tap(window: &WindowChannel) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        window.add_listener(listener(move |inbound| {
            let _ = tx.send(inbound.message);
            Disposition::NotHandled
        }));
        rx
    }

    #[tokio::test]
    async fn replies_through_the_native_responder() {
        for policy in [ResponsePolicy::RequiresAsyncSignal, ResponsePolicy::OpenWhileHeld] {
            let channel = native(policy);
            let server = RpcServer::new(
                ServerConfig::new(EndpointRole::Background),
                channel.clone(),
                registry_with_get(),
            );
            server.listen().unwrap();

            let response = channel
                .request(request(EndpointRole::Background, "get", json!({"key": "x"})))
                .await
                .unwrap();
            let reply = decode_envelope(&response).unwrap();

            assert_eq!(reply.destination_role, EndpointRole::WebPage);
            assert_eq!(reply.call_id.as_deref(), Some("call-1"));
            assert_eq!(
                reply.into_outcome().unwrap().unwrap(),
                json!({"key": "x", "value": 42})
            );
        }
    }

    #[tokio::test]
    async fn missing_procedure_becomes_an_error_reply() {
        let channel = native(ResponsePolicy::RequiresAsyncSignal);
        let server = RpcServer::new(
            ServerConfig::new(EndpointRole::Background),
            channel.clone(),
            ProcedureRegistry::new(),
        );
        server.listen().unwrap();

        let response = channel
            .request(request(EndpointRole::Background, "scrape-votes", json!(null)))
            .await
            .unwrap();
        let error = decode_envelope(&response)
            .unwrap()
            .into_outcome()
            .unwrap()
            .unwrap_err();

        assert_eq!(error.code, ErrorCode::ProcedureNotFound);
        assert!(error.message.contains("scrape-votes"));
    }

    #[tokio::test]
    async fn other_roles_are_not_handled() {
        let channel = native(ResponsePolicy::RequiresAsyncSignal);
        let server = RpcServer::new(
            ServerConfig::new(EndpointRole::Background),
            channel.clone(),
            registry_with_get(),
        );
        server.listen().unwrap();

        let result = channel
            .request(request(EndpointRole::WebPage, "get", json!({"key": "x"})))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn broadcast_server_posts_reply_and_ignores_it() {
        let window = Arc::new(WindowChannel::new("window"));
        let mut posted = tap(&window);
        let server = RpcServer::new(
            ServerConfig::new(EndpointRole::WebPage).with_sender_tag("page"),
            window.clone(),
            registry_with_get(),
        );
        server.listen().unwrap();

        let message = encode_envelope(
            &Envelope::request(EndpointRole::WebPage, "get", json!({"key": "y"}))
                .with_reply_to(EndpointRole::Relay),
        )
        .unwrap();
        window.post(message.clone()).unwrap();

        assert_eq!(posted.recv().await.unwrap(), message);
        let reply = decode_envelope(&posted.recv().await.unwrap()).unwrap();
        assert_eq!(reply.destination_role, EndpointRole::Relay);
        assert_eq!(reply.sender.as_deref(), Some("page"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(posted.try_recv().is_err());
    }

    #[tokio::test]
    async fn own_tag_and_malformed_requests_are_dropped() {
        let window = Arc::new(WindowChannel::new("window"));
        let mut posted = tap(&window);
        let server = RpcServer::new(
            ServerConfig::new(EndpointRole::WebPage).with_sender_tag("page"),
            window.clone(),
            registry_with_get(),
        );
        server.listen().unwrap();

        let echoed = Envelope::request(EndpointRole::WebPage, "get", json!({}))
            .with_reply_to(EndpointRole::Relay)
            .with_sender("page");
        window.post(encode_envelope(&echoed).unwrap()).unwrap();
        window
            .post(json!({"destinationRole": "web-page", "procedureName": 3}))
            .unwrap();

        posted.recv().await.unwrap();
        posted.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(posted.try_recv().is_err());
    }

    #[tokio::test]
    async fn listen_twice_fails() {
        let server = RpcServer::new(
            ServerConfig::new(EndpointRole::Relay),
            Arc::new(WindowChannel::new("window")),
            ProcedureRegistry::new(),
        );
        server.listen().unwrap();
        assert!(matches!(
            server.listen(),
            Err(ServerError::AlreadyListening {
                role: EndpointRole::Relay
            })
        ));

        assert!(server.stop());
        assert!(!server.is_listening());
        server.listen().unwrap();
    }

    #[test]
    fn listen_requires_a_runtime() {
        let server = RpcServer::new(
            ServerConfig::new(EndpointRole::Background),
            Arc::new(WindowChannel::new("window")),
            ProcedureRegistry::new(),
        );
        assert!(matches!(server.listen(), Err(ServerError::NoRuntime)));
    }
}
