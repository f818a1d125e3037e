//! Envelope and error payload types.

use extrpc_core::EndpointRole;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// The unit of communication between contexts.
///
/// An envelope is either a request (neither `return_value` nor `error` set)
/// or a reply (exactly one of them set). A `return_value` of JSON `null` still
/// marks a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Role of the server (or client, for replies) that should accept this.
    pub destination_role: EndpointRole,
    /// Name of the procedure being called or answered.
    pub procedure_name: String,
    /// Procedure arguments (requests only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure_args: Option<Value>,
    /// Procedure result (successful replies only).
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub return_value: Option<Value>,
    /// Failure forwarded to the caller (failed replies only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
    /// Per-call identifier echoed on the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Role the caller listens on for the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<EndpointRole>,
    /// Asks the relay to capture the page's reply and answer over the native
    /// channel.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub capture_return_value: bool,
    /// Tag of the context that put this message on a shared channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; a missing field falls back
/// to `None` through `#[serde(default)]`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Whether an envelope asks for work or answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// A procedure call.
    Request,
    /// The answer to a procedure call.
    Reply,
}

impl Envelope {
    /// Creates a request envelope. A `null` argument is left out of the wire
    /// message.
    pub fn request(
        destination_role: EndpointRole,
        procedure_name: impl Into<String>,
        procedure_args: Value,
    ) -> Self {
        Self {
            destination_role,
            procedure_name: procedure_name.into(),
            procedure_args: (!procedure_args.is_null()).then_some(procedure_args),
            return_value: None,
            error: None,
            call_id: None,
            reply_to: None,
            capture_return_value: false,
            sender: None,
        }
    }

    /// Creates a reply envelope carrying either the return value or the error.
    pub fn reply(
        destination_role: EndpointRole,
        procedure_name: impl Into<String>,
        outcome: Result<Value, RemoteError>,
    ) -> Self {
        let (return_value, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            destination_role,
            procedure_name: procedure_name.into(),
            procedure_args: None,
            return_value,
            error,
            call_id: None,
            reply_to: None,
            capture_return_value: false,
            sender: None,
        }
    }

    /// Builds the reply to this request, addressed to `destination_role` and
    /// carrying the same procedure name and call id.
    pub fn reply_with(
        &self,
        destination_role: EndpointRole,
        outcome: Result<Value, RemoteError>,
    ) -> Self {
        let mut reply = Self::reply(destination_role, self.procedure_name.clone(), outcome);
        reply.call_id = self.call_id.clone();
        reply
    }

    /// Builder: set the call id.
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Builder: set the reply role.
    pub fn with_reply_to(mut self, role: EndpointRole) -> Self {
        self.reply_to = Some(role);
        self
    }

    /// Builder: set the sender tag.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Builder: drop the sender tag.
    pub fn without_sender(mut self) -> Self {
        self.sender = None;
        self
    }

    /// Builder: ask the relay to capture the return value.
    pub fn capturing_return_value(mut self, capture: bool) -> Self {
        self.capture_return_value = capture;
        self
    }

    /// Builder: change the destination role.
    pub fn readdressed(mut self, role: EndpointRole) -> Self {
        self.destination_role = role;
        self
    }

    /// Classifies the envelope, rejecting inconsistent field combinations.
    pub fn kind(&self) -> ProtocolResult<EnvelopeKind> {
        if self.procedure_name.is_empty() {
            return Err(ProtocolError::malformed("empty procedureName"));
        }
        match (&self.return_value, &self.error) {
            (None, None) => Ok(EnvelopeKind::Request),
            (Some(_), None) | (None, Some(_)) => Ok(EnvelopeKind::Reply),
            (Some(_), Some(_)) => Err(ProtocolError::malformed(format!(
                "reply for '{}' carries both returnValue and error",
                self.procedure_name
            ))),
        }
    }

    /// Returns true if this envelope answers a call.
    pub fn is_reply(&self) -> bool {
        self.return_value.is_some() || self.error.is_some()
    }

    /// Arguments, with an absent value read as `null`.
    pub fn args(&self) -> Value {
        self.procedure_args.clone().unwrap_or(Value::Null)
    }

    /// Consumes a reply and returns its outcome. Requests yield `None`.
    pub fn into_outcome(self) -> Option<Result<Value, RemoteError>> {
        match (self.return_value, self.error) {
            (_, Some(error)) => Some(Err(error)),
            (Some(value), None) => Some(Ok(value)),
            (None, None) => None,
        }
    }

    /// Returns true if this reply answers a call to `procedure_name` with
    /// `call_id`. A reply without a call id matches by name alone.
    pub fn answers(&self, procedure_name: &str, call_id: Option<&str>) -> bool {
        if !self.is_reply() || self.procedure_name != procedure_name {
            return false;
        }
        match (self.call_id.as_deref(), call_id) {
            (Some(received), Some(expected)) => received == expected,
            _ => true,
        }
    }
}

/// Application-layer failure carried back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Machine-readable failure class.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl RemoteError {
    /// Creates a remote error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// No procedure with this name is registered on the destination.
    pub fn procedure_not_found(procedure_name: &str) -> Self {
        Self::new(
            ErrorCode::ProcedureNotFound,
            format!("no procedure registered with the name '{procedure_name}'"),
        )
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

/// Failure classes carried in [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The destination has no procedure with the requested name.
    ProcedureNotFound,
    /// The procedure ran and failed.
    ProcedureFailed,
    /// A hop could not reach the next context.
    Unreachable,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorCode {
    /// Returns the wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcedureNotFound => "procedure_not_found",
            Self::ProcedureFailed => "procedure_failed",
            Self::Unreachable => "unreachable",
            Self::Internal => "internal",
        }
    }
}
