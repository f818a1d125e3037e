//! Conversion between envelopes and raw transport messages.
//!
//! Broadcast channels carry arbitrary JSON, so decoding is two-staged: cheap
//! field peeks decide whether a message concerns a listener at all, and only
//! then is it decoded and validated. A message that matches the destination
//! but fails decoding is a [`ProtocolError::MalformedEnvelope`].

use extrpc_core::EndpointRole;
use serde_json::Value;

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::Envelope;

/// Encodes an envelope into a transport message.
///
/// # Example
///
/// ```rust
/// use extrpc_core::EndpointRole;
/// use extrpc_protocol::{Envelope, encode_envelope};
/// use serde_json::json;
///
/// let request = Envelope::request(EndpointRole::Relay, "scrape-votes", json!(null));
/// let message = encode_envelope(&request).unwrap();
/// assert_eq!(message["destinationRole"], "relay");
/// ```
pub fn encode_envelope(envelope: &Envelope) -> ProtocolResult<Value> {
    envelope.kind()?;

    let size = serde_json::to_vec(envelope)?.len();
    if size > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok(serde_json::to_value(envelope)?)
}

/// Decodes and validates a transport message.
pub fn decode_envelope(message: &Value) -> ProtocolResult<Envelope> {
    if !message.is_object() {
        return Err(ProtocolError::malformed("message is not a JSON object"));
    }

    let envelope: Envelope = serde_json::from_value(message.clone())
        .map_err(|e| ProtocolError::malformed(e.to_string()))?;
    envelope.kind()?;
    Ok(envelope)
}

/// Returns the raw `destinationRole` of a message, if it has one.
pub fn destination_of(message: &Value) -> Option<&str> {
    message.get("destinationRole")?.as_str()
}

/// Returns the sender tag of a message, if it has one.
pub fn sender_of(message: &Value) -> Option<&str> {
    message.get("sender")?.as_str()
}

/// Returns true if the message is addressed to `role`.
pub fn addressed_to(message: &Value, role: EndpointRole) -> bool {
    destination_of(message) == Some(role.as_str())
}

/// Returns true if the message carries a reply outcome.
///
/// Agrees with [`decode_envelope`]: a `returnValue` of `null` is a reply, an
/// `error` of `null` is not.
pub fn is_reply_message(message: &Value) -> bool {
    message.as_object().is_some_and(|object| {
        object.contains_key("returnValue") || object.get("error").is_some_and(|e| !e.is_null())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnvelopeKind, RemoteError};
    use serde_json::json;

    #[test]
    fn encode_decode_preserves_envelope() {
        let reply = Envelope::reply(EndpointRole::Relay, "get", Ok(json!({"key": "x", "value": 42})))
            .with_call_id("c-1")
            .with_sender("relay");

        let message = encode_envelope(&reply).unwrap();
        let decoded = decode_envelope(&message).unwrap();

        assert_eq!(decoded, reply);
        assert_eq!(decoded.kind().unwrap(), EnvelopeKind::Reply);
    }

    #[test]
    fn encode_rejects_inconsistent_envelope() {
        let mut reply = Envelope::reply(EndpointRole::Relay, "get", Ok(json!(1)));
        reply.error = Some(RemoteError::procedure_not_found("get"));
        assert!(encode_envelope(&reply).is_err());
    }

    #[test]
    fn decode_missing_procedure_name() {
        let result = decode_envelope(&json!({"destinationRole": "background"}));
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn decode_unknown_role() {
        let result = decode_envelope(&json!({
            "destinationRole": "content-script",
            "procedureName": "get"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn decode_non_object() {
        assert!(decode_envelope(&json!("page-script-satisfied")).is_err());
        assert!(decode_envelope(&json!([1, 2])).is_err());
    }

    #[test]
    fn peeks() {
        let message = json!({
            "destinationRole": "web-page",
            "procedureName": "get",
            "returnValue": null,
            "sender": "relay"
        });

        assert_eq!(destination_of(&message), Some("web-page"));
        assert_eq!(sender_of(&message), Some("relay"));
        assert!(addressed_to(&message, EndpointRole::WebPage));
        assert!(!addressed_to(&message, EndpointRole::Background));
        assert!(is_reply_message(&message));

        let unrelated = json!("page-script-satisfied");
        assert_eq!(destination_of(&unrelated), None);
        assert!(!is_reply_message(&unrelated));
    }

    #[test]
    fn null_error_is_a_request_for_peek_and_decoder_alike() {
        let message = json!({
            "destinationRole": "background",
            "procedureName": "save",
            "error": null
        });

        assert!(!is_reply_message(&message));
        assert_eq!(
            decode_envelope(&message).unwrap().kind().unwrap(),
            EnvelopeKind::Request
        );

        let failed = json!({
            "destinationRole": "background",
            "procedureName": "save",
            "error": {"code": "procedure_failed", "message": "quota"}
        });
        assert!(is_reply_message(&failed));
        assert_eq!(
            decode_envelope(&failed).unwrap().kind().unwrap(),
            EnvelopeKind::Reply
        );
    }
}
