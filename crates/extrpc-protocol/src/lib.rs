//! Envelope wire format for extrpc.
//!
//! Every message crossing a context boundary is a JSON object shaped as an
//! [`Envelope`]:
//!
//! ```text
//! Request:  { destinationRole, procedureName, procedureArgs?, callId?, replyTo?, captureReturnValue? }
//! Reply:    { destinationRole, procedureName, returnValue | error, callId? }
//! ```
//!
//! Transports carry raw [`serde_json::Value`]s because broadcast channels are
//! shared with unrelated traffic. Listeners peek at the destination with
//! [`destination_of`] before paying for a full [`decode_envelope`].
//!
//! # Example
//!
//! ```rust
//! use extrpc_core::EndpointRole;
//! use extrpc_protocol::{Envelope, decode_envelope, encode_envelope};
//! use serde_json::json;
//!
//! let request = Envelope::request(EndpointRole::Background, "get", json!({"key": "x"}));
//! let message = encode_envelope(&request).unwrap();
//! let decoded = decode_envelope(&message).unwrap();
//! assert_eq!(decoded, request);
//! ```

mod codec;
mod error;
mod types;

pub use codec::{
    addressed_to, decode_envelope, destination_of, encode_envelope, is_reply_message, sender_of,
};
pub use error::{ProtocolError, ProtocolResult};
pub use types::{Envelope, EnvelopeKind, ErrorCode, RemoteError};

/// Largest message accepted by the native messaging APIs (64 MiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
