//! Transport error types.

use thiserror::Error;

use extrpc_core::Engine;

use crate::host::TabId;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised by transports and the extension host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Nothing is listening on the channel.
    #[error("could not establish connection on {channel}: receiving end does not exist")]
    NoReceiver { channel: String },

    /// The response channel closed before anyone responded.
    #[error("{channel}: the message port closed before a response was received")]
    NoResponse { channel: String },

    /// A responder was used after its channel closed.
    #[error("response channel already closed")]
    ResponseChannelClosed,

    /// The transport cannot perform the operation.
    #[error("{channel} does not support {operation}")]
    Unsupported {
        channel: String,
        operation: &'static str,
    },

    /// No tab with this id is open.
    #[error("no tab with id {0}")]
    UnknownTab(TabId),

    /// Web pages cannot message the extension directly on this engine.
    #[error("{engine} does not support direct page-to-extension messaging")]
    ExternalMessagingUnsupported { engine: Engine },

    /// The page addressed an extension id this host does not serve.
    #[error("unknown extension id '{0}'")]
    UnknownExtension(String),
}

impl TransportError {
    /// Creates a no-receiver error.
    pub fn no_receiver(channel: impl Into<String>) -> Self {
        Self::NoReceiver {
            channel: channel.into(),
        }
    }

    /// Creates a no-response error.
    pub fn no_response(channel: impl Into<String>) -> Self {
        Self::NoResponse {
            channel: channel.into(),
        }
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported(channel: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            channel: channel.into(),
            operation,
        }
    }
}
