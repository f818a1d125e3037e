//! Transport adapters for extrpc.
//!
//! The RPC layer is written once against the [`Transport`] contract. Two
//! adapters implement it:
//!
//! - [`WindowChannel`]: the page's `postMessage` bus. Unaddressed, every
//!   listener sees every message (its own included), no request/response
//!   pairing.
//! - [`NativeChannel`]: extension runtime messaging toward one receiving
//!   context. Each message carries a [`Responder`]; how long it stays usable
//!   after the listener returns depends on the engine's
//!   [`ResponsePolicy`](extrpc_core::ResponsePolicy).
//!
//! [`ExtensionHost`] wires these channels together the way a browser does
//! for one extension: a background runtime channel, an optional external
//! channel (Chromium's `externally_connectable`), and per-tab window and
//! content-script channels.
//!
//! Listeners are synchronous callbacks run on the sending task. They must
//! not block; asynchronous work is spawned and answered through the
//! responder or a later `post`.

mod error;
mod host;
mod listener;
mod native;
mod window;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

pub use error::{TransportError, TransportResult};
pub use host::{ExtensionHost, Tab, TabId};
pub use listener::{Disposition, Inbound, Listener, ListenerId, Responder, listener};
pub use native::NativeChannel;
pub use window::WindowChannel;

/// Future resolving with the response to a native request.
pub type ResponseFuture = Pin<Box<dyn Future<Output = TransportResult<Value>> + Send>>;

/// Which primitive a transport models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Shared broadcast bus without request/response pairing.
    Broadcast,
    /// Addressed messaging with a per-message response channel.
    Native,
}

/// Capability contract shared by every transport adapter.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Human-readable channel name used in logs.
    fn name(&self) -> &str;

    /// The primitive this transport models.
    fn kind(&self) -> TransportKind;

    /// Installs a listener. It receives every message delivered after this
    /// call returns.
    fn add_listener(&self, listener: Listener) -> ListenerId;

    /// Removes a listener. Returns false if it was already gone.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Sends a message without waiting for a response.
    fn post(&self, message: Value) -> TransportResult<()>;

    /// Sends a message and resolves with the receiver's response.
    ///
    /// Broadcast transports have no pairing and fail with
    /// [`TransportError::Unsupported`].
    fn request(&self, message: Value) -> ResponseFuture;
}
