//! Content-script relay between the web page and the background.
//!
//! The relay owns two listeners. Its native listener takes requests the
//! background addressed to the relay and rebroadcasts them to the page,
//! capturing the page's reply when asked to. Its window listener, installed
//! only on engines where pages cannot reach the background directly, takes
//! page requests addressed to the relay, forwards them to the background and
//! rebroadcasts the answer.
//!
//! Replies and anything carrying the relay's own sender tag are never treated
//! as requests, so a rebroadcast cannot loop back into the relay.

use std::sync::{Arc, Mutex, MutexGuard};

use extrpc_core::{EndpointRole, Engine};
use extrpc_protocol::{
    Envelope, ErrorCode, RemoteError, addressed_to, decode_envelope, encode_envelope,
    is_reply_message, sender_of,
};
use extrpc_transport::{
    Disposition, Inbound, ListenerId, Responder, Transport, TransportError, listener,
};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};

/// Default sender tag of the relay.
pub const RELAY_SENDER_TAG: &str = "content-script-rpc-proxy";

/// Forwards envelopes between the page's window and extension messaging.
#[derive(Debug)]
pub struct Relay {
    engine: Engine,
    hops: Arc<Hops>,
    installed: Mutex<Vec<(Arc<dyn Transport>, ListenerId)>>,
}

/// Channels the relay talks on.
#[derive(Debug)]
struct Hops {
    sender_tag: String,
    /// The page's broadcast bus.
    window: Arc<dyn Transport>,
    /// Messages from the background to this tab.
    content_script: Arc<dyn Transport>,
    /// Messages from this tab to the background.
    runtime: Arc<dyn Transport>,
}

impl Relay {
    /// Creates a relay for one tab.
    pub fn new(
        engine: Engine,
        window: Arc<dyn Transport>,
        content_script: Arc<dyn Transport>,
        runtime: Arc<dyn Transport>,
    ) -> Self {
        Self {
            engine,
            hops: Arc::new(Hops {
                sender_tag: RELAY_SENDER_TAG.to_string(),
                window,
                content_script,
                runtime,
            }),
            installed: Mutex::new(Vec::new()),
        }
    }

    /// Builder: set the sender tag.
    ///
    /// Has no effect once the relay is listening.
    pub fn with_sender_tag(mut self, tag: impl Into<String>) -> Self {
        if let Some(hops) = Arc::get_mut(&mut self.hops) {
            hops.sender_tag = tag.into();
        }
        self
    }

    /// The relay's sender tag.
    pub fn sender_tag(&self) -> &str {
        &self.hops.sender_tag
    }

    /// Returns true once `listen` succeeded and `stop` was not called.
    pub fn is_listening(&self) -> bool {
        !self.lock_installed().is_empty()
    }

    /// Installs the relay's listeners.
    pub fn listen(&self) -> ServerResult<()> {
        let mut installed = self.lock_installed();
        if !installed.is_empty() {
            return Err(ServerError::already_listening(EndpointRole::Relay));
        }
        let runtime = Handle::try_current().map_err(|_| ServerError::NoRuntime)?;

        let hops = self.hops.clone();
        let handle = runtime.clone();
        let id = self
            .hops
            .content_script
            .add_listener(listener(move |inbound| hops.from_background(inbound, &handle)));
        installed.push((self.hops.content_script.clone(), id));

        if !self.engine.supports_direct_page_messaging() {
            let hops = self.hops.clone();
            let id = self
                .hops
                .window
                .add_listener(listener(move |inbound| hops.from_page(inbound, &runtime)));
            installed.push((self.hops.window.clone(), id));
        }

        info!(
            engine = %self.engine,
            listeners = installed.len(),
            "relay listening"
        );
        Ok(())
    }

    /// Removes the relay's listeners. Returns false if not listening.
    pub fn stop(&self) -> bool {
        let installed: Vec<_> = self.lock_installed().drain(..).collect();
        let was_listening = !installed.is_empty();
        for (transport, id) in installed {
            transport.remove_listener(id);
        }
        was_listening
    }

    fn lock_installed(&self) -> MutexGuard<'_, Vec<(Arc<dyn Transport>, ListenerId)>> {
        lock(&self.installed)
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A pending reply capture.
struct Capture {
    window: Arc<dyn Transport>,
    id: ListenerId,
    slot: Arc<Mutex<Option<oneshot::Sender<Value>>>>,
}

impl Capture {
    /// Removes the listener and ends the capture task.
    fn cancel(self) {
        self.window.remove_listener(self.id);
        lock(&self.slot).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Hops {
    /// Decodes a request addressed to the relay, skipping replies and the
    /// relay's own traffic.
    fn intake(&self, message: &Value) -> Option<Envelope> {
        if !addressed_to(message, EndpointRole::Relay)
            || is_reply_message(message)
            || sender_of(message) == Some(self.sender_tag.as_str())
        {
            return None;
        }
        match decode_envelope(message) {
            Ok(request) => Some(request),
            Err(e) => {
                warn!(role = %EndpointRole::Relay, error = %e, "dropping malformed request");
                None
            }
        }
    }

    /// Background to page.
    fn from_background(self: &Arc<Self>, inbound: Inbound, runtime: &Handle) -> Disposition {
        let Some(request) = self.intake(&inbound.message) else {
            return Disposition::NotHandled;
        };
        debug!(
            procedure = %request.procedure_name,
            call_id = ?request.call_id,
            capture = request.capture_return_value,
            "relaying request to the web page"
        );

        let forwarded = request
            .clone()
            .readdressed(EndpointRole::WebPage)
            .with_sender(self.sender_tag.clone());

        let responder = inbound.responder.filter(|r| r.is_open());
        match responder {
            Some(responder) if request.capture_return_value => {
                let forwarded = forwarded
                    .with_reply_to(EndpointRole::Relay)
                    .capturing_return_value(false);
                let capture = self.capture_reply(&request, responder, runtime);
                if self.broadcast(&forwarded) {
                    Disposition::RespondLater
                } else {
                    capture.cancel();
                    Disposition::Handled
                }
            }
            _ => {
                if request.capture_return_value {
                    warn!(
                        procedure = %request.procedure_name,
                        "capture requested without a response channel, relaying one-way"
                    );
                }
                self.broadcast(&forwarded);
                Disposition::Handled
            }
        }
    }

    /// Installs a window listener for the page's reply and a task handing
    /// that reply to `responder`.
    ///
    /// The listener is removed when the reply arrives, when the background
    /// stops waiting, or when the capture is cancelled.
    fn capture_reply(
        self: &Arc<Self>,
        request: &Envelope,
        responder: Responder,
        runtime: &Handle,
    ) -> Capture {
        let procedure = request.procedure_name.clone();
        let call_id = request.call_id.clone();
        let (reply_tx, reply_rx) = oneshot::channel::<Value>();
        let slot = Arc::new(Mutex::new(Some(reply_tx)));

        let matched = slot.clone();
        let expected = procedure.clone();
        let id = self.window.add_listener(listener(move |inbound| {
            let message = inbound.message;
            if !addressed_to(&message, EndpointRole::Relay) || !is_reply_message(&message) {
                return Disposition::NotHandled;
            }
            let Ok(reply) = decode_envelope(&message) else {
                return Disposition::NotHandled;
            };
            if !reply.answers(&expected, call_id.as_deref()) {
                return Disposition::NotHandled;
            }
            match lock(&matched).take() {
                Some(tx) => {
                    let _ = tx.send(message);
                    Disposition::Handled
                }
                None => Disposition::NotHandled,
            }
        }));

        let window = self.window.clone();
        runtime.spawn(async move {
            tokio::select! {
                reply = reply_rx => {
                    window.remove_listener(id);
                    let Ok(message) = reply else {
                        debug!(procedure = %procedure, "reply capture cancelled");
                        return;
                    };
                    debug!(procedure = %procedure, "captured web page reply");
                    if let Err(e) = responder.respond(message) {
                        warn!(procedure = %procedure, error = %e, "background stopped waiting for the reply");
                    }
                }
                () = responder.closed() => {
                    window.remove_listener(id);
                    debug!(procedure = %procedure, "background stopped waiting, dropping reply capture");
                }
            }
        });

        Capture {
            window: self.window.clone(),
            id,
            slot,
        }
    }

    /// Page to background.
    fn from_page(self: &Arc<Self>, inbound: Inbound, runtime: &Handle) -> Disposition {
        let Some(request) = self.intake(&inbound.message) else {
            return Disposition::NotHandled;
        };
        debug!(
            procedure = %request.procedure_name,
            call_id = ?request.call_id,
            "relaying request to the background"
        );
        let hops = self.clone();
        runtime.spawn(async move { hops.forward_to_background(request).await });
        Disposition::Handled
    }

    async fn forward_to_background(self: Arc<Self>, request: Envelope) {
        let outgoing = request
            .clone()
            .readdressed(EndpointRole::Background)
            .without_sender();

        let outcome = match encode_envelope(&outgoing) {
            Ok(message) => self.runtime.request(message).await,
            Err(e) => {
                error!(procedure = %request.procedure_name, error = %e, "failed to encode request");
                return;
            }
        };
        let outcome = match outcome {
            Ok(response) => match decode_envelope(&response).map(Envelope::into_outcome) {
                Ok(Some(outcome)) => outcome,
                Ok(None) | Err(_) => Err(RemoteError::new(
                    ErrorCode::Internal,
                    format!(
                        "background answered '{}' with something that is not a reply",
                        request.procedure_name
                    ),
                )),
            },
            Err(e) => Err(self.unreachable(&request, &e)),
        };

        let destination = request.reply_to.unwrap_or(EndpointRole::WebPage);
        let reply = request
            .reply_with(destination, outcome)
            .with_sender(self.sender_tag.clone());
        self.broadcast(&reply);
    }

    fn unreachable(&self, request: &Envelope, e: &TransportError) -> RemoteError {
        error!(
            procedure = %request.procedure_name,
            role = %EndpointRole::Background,
            error = %e,
            "no return value from the extension messaging system, this is likely a wiring bug"
        );
        RemoteError::new(
            ErrorCode::Unreachable,
            format!(
                "no return value from the background for '{}': {e}",
                request.procedure_name
            ),
        )
    }

    fn broadcast(&self, envelope: &Envelope) -> bool {
        let posted = encode_envelope(envelope)
            .map_err(|e| e.to_string())
            .and_then(|message| self.window.post(message).map_err(|e| e.to_string()));
        if let Err(e) = &posted {
            error!(
                procedure = %envelope.procedure_name,
                role = %envelope.destination_role,
                error = %e,
                "failed to broadcast on the window"
            );
        }
        posted.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extrpc_core::ResponsePolicy;
    use extrpc_transport::{NativeChannel, WindowChannel};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        window: Arc<WindowChannel>,
        content_script: Arc<NativeChannel>,
        runtime: Arc<NativeChannel>,
        relay: Relay,
    }

    fn fixture(engine: Engine) -> Fixture {
        let policy = engine.response_policy();
        let window = Arc::new(WindowChannel::new("window"));
        let content_script = Arc::new(NativeChannel::new("tabs.sendMessage", policy));
        let runtime = Arc::new(NativeChannel::new("runtime", policy));
        let relay = Relay::new(
            engine,
            window.clone(),
            content_script.clone(),
            runtime.clone(),
        );
        relay.listen().unwrap();
        Fixture {
            window,
            content_script,
            runtime,
            relay,
        }
    }

    fn tap(window: &WindowChannel) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        window.add_listener(listener(move |inbound| {
            let _ = tx.send(inbound.message);
            Disposition::NotHandled
        }));
        rx
    }

    /// Background stand-in answering every request with its arguments.
    fn echo_background(runtime: &NativeChannel) {
        runtime.add_listener(listener(|inbound| {
            let request = decode_envelope(&inbound.message).unwrap();
            assert_eq!(request.destination_role, EndpointRole::Background);
            let reply = request.reply_with(EndpointRole::Relay, Ok(request.args()));
            if let Some(responder) = inbound.responder {
                responder.respond(encode_envelope(&reply).unwrap()).unwrap();
            }
            Disposition::Handled
        }));
    }

    #[tokio::test]
    async fn forwards_page_requests_and_rebroadcasts_replies() {
        let fx = fixture(Engine::Firefox);
        echo_background(&fx.runtime);
        let mut posted = tap(&fx.window);

        let request = Envelope::request(EndpointRole::Relay, "scrape-votes", json!({"count": 7}))
            .with_call_id("c-1")
            .with_reply_to(EndpointRole::WebPage)
            .with_sender("page-client");
        fx.window.post(encode_envelope(&request).unwrap()).unwrap();
        posted.recv().await.unwrap();

        let reply = decode_envelope(&posted.recv().await.unwrap()).unwrap();
        assert_eq!(reply.destination_role, EndpointRole::WebPage);
        assert_eq!(reply.call_id.as_deref(), Some("c-1"));
        assert_eq!(reply.sender.as_deref(), Some(RELAY_SENDER_TAG));
        assert_eq!(reply.into_outcome().unwrap().unwrap(), json!({"count": 7}));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(posted.try_recv().is_err());
    }

    #[tokio::test]
    async fn silent_background_yields_unreachable_reply() {
        let fx = fixture(Engine::Firefox);
        fx.runtime.add_listener(listener(|_| Disposition::NotHandled));
        let mut posted = tap(&fx.window);

        let request = Envelope::request(EndpointRole::Relay, "expand-posts", json!(null))
            .with_reply_to(EndpointRole::WebPage);
        fx.window.post(encode_envelope(&request).unwrap()).unwrap();
        posted.recv().await.unwrap();

        let error = decode_envelope(&posted.recv().await.unwrap())
            .unwrap()
            .into_outcome()
            .unwrap()
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::Unreachable);
        assert!(error.message.contains("expand-posts"));
    }

    #[tokio::test]
    async fn ignores_replies_and_own_traffic() {
        let fx = fixture(Engine::Firefox);
        let forwarded = Arc::new(Mutex::new(0));
        let counter = forwarded.clone();
        fx.runtime.add_listener(listener(move |_| {
            *counter.lock().unwrap() += 1;
            Disposition::NotHandled
        }));

        let reply = Envelope::reply(EndpointRole::Relay, "get", Ok(json!(1)));
        let own = Envelope::request(EndpointRole::Relay, "get", json!({}))
            .with_sender(fx.relay.sender_tag());
        fx.window.post(encode_envelope(&reply).unwrap()).unwrap();
        fx.window.post(encode_envelope(&own).unwrap()).unwrap();
        fx.window.post(json!("page-script-satisfied")).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*forwarded.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn chromium_relay_does_not_forward_page_requests() {
        let fx = fixture(Engine::Chromium);
        assert_eq!(fx.window.listener_count(), 0);
        assert_eq!(fx.content_script.listener_count(), 1);
    }

    #[tokio::test]
    async fn rebroadcasts_background_requests_to_the_page() {
        let fx = fixture(Engine::Chromium);
        let mut posted = tap(&fx.window);

        let request = Envelope::request(EndpointRole::Relay, "scrape-votes", json!(null))
            .with_call_id("c-2")
            .with_reply_to(EndpointRole::Background);
        fx.content_script
            .post(encode_envelope(&request).unwrap())
            .unwrap();

        let forwarded = decode_envelope(&posted.recv().await.unwrap()).unwrap();
        assert_eq!(forwarded.destination_role, EndpointRole::WebPage);
        assert_eq!(forwarded.reply_to, Some(EndpointRole::Background));
        assert_eq!(forwarded.call_id.as_deref(), Some("c-2"));
    }

    #[tokio::test]
    async fn captures_the_page_reply() {
        let fx = fixture(Engine::Firefox);

        // Page server stand-in.
        let window = fx.window.clone();
        fx.window.add_listener(listener(move |inbound| {
            if !addressed_to(&inbound.message, EndpointRole::WebPage) {
                return Disposition::NotHandled;
            }
            let request = decode_envelope(&inbound.message).unwrap();
            assert_eq!(request.reply_to, Some(EndpointRole::Relay));
            let decoy = Envelope::reply(EndpointRole::Relay, "other", Ok(json!("wrong")));
            let reply = request.reply_with(EndpointRole::Relay, Ok(json!({"count": 7})));
            window.post(encode_envelope(&decoy).unwrap()).unwrap();
            window.post(encode_envelope(&reply).unwrap()).unwrap();
            Disposition::Handled
        }));

        let request = Envelope::request(EndpointRole::Relay, "scrape-votes", json!(null))
            .with_call_id("c-3")
            .capturing_return_value(true);
        let response = fx
            .content_script
            .request(encode_envelope(&request).unwrap())
            .await
            .unwrap();

        let reply = decode_envelope(&response).unwrap();
        assert_eq!(reply.call_id.as_deref(), Some("c-3"));
        assert_eq!(reply.into_outcome().unwrap().unwrap(), json!({"count": 7}));
        assert_eq!(fx.window.listener_count(), 2);
    }

    #[tokio::test]
    async fn abandoned_capture_removes_its_listener() {
        let fx = fixture(Engine::Firefox);
        let baseline = fx.window.listener_count();

        for n in 0..3 {
            let request = Envelope::request(EndpointRole::Relay, "page-info", json!(null))
                .with_call_id(format!("c-{n}"))
                .capturing_return_value(true);
            let pending = fx.content_script.request(encode_envelope(&request).unwrap());
            assert!(
                tokio::time::timeout(Duration::from_millis(10), pending)
                    .await
                    .is_err()
            );
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(fx.window.listener_count(), baseline);
    }

    #[tokio::test]
    async fn listen_twice_fails_and_stop_removes_listeners() {
        let fx = fixture(Engine::Firefox);
        assert!(matches!(
            fx.relay.listen(),
            Err(ServerError::AlreadyListening { .. })
        ));
        assert!(fx.relay.stop());
        assert_eq!(fx.window.listener_count(), 0);
        assert_eq!(fx.content_script.listener_count(), 0);
        assert!(!fx.relay.is_listening());
    }
}
