//! Client error types.

use std::time::Duration;

use extrpc_core::EndpointRole;
use extrpc_protocol::{ErrorCode, ProtocolError};
use extrpc_server::RegistryError;
use extrpc_transport::TransportError;
use thiserror::Error;

use crate::wiring::WiringError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The remote side answered with an error.
    #[error("'{procedure}' on {role} failed ({}): {message}", .code.as_str())]
    Remote {
        procedure: String,
        role: EndpointRole,
        code: ErrorCode,
        message: String,
    },

    /// No reply arrived within the configured call timeout.
    #[error("timed out after {}s waiting for '{procedure}' on {role}", .timeout.as_secs_f64())]
    Timeout {
        procedure: String,
        role: EndpointRole,
        timeout: Duration,
    },

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Arguments or return value did not match the expected type.
    #[error("'{procedure}': {source}")]
    Serde {
        procedure: String,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Procedure registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Contexts could not be wired.
    #[error(transparent)]
    Wiring(#[from] WiringError),
}

impl ClientError {
    /// Returns the remote error code, if the remote side answered with one.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the destination has no procedure with the name.
    pub fn is_procedure_not_found(&self) -> bool {
        self.remote_code() == Some(ErrorCode::ProcedureNotFound)
    }

    /// Returns true if the call timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_display() {
        let err = ClientError::Remote {
            procedure: "scrape-votes".to_string(),
            role: EndpointRole::Background,
            code: ErrorCode::ProcedureNotFound,
            message: "no procedure registered with the name 'scrape-votes'".to_string(),
        };
        assert!(err.is_procedure_not_found());
        assert_eq!(
            err.to_string(),
            "'scrape-votes' on background failed (procedure_not_found): \
             no procedure registered with the name 'scrape-votes'"
        );
    }

    #[test]
    fn timeout_display() {
        let err = ClientError::Timeout {
            procedure: "get".to_string(),
            role: EndpointRole::Relay,
            timeout: Duration::from_millis(1500),
        };
        assert!(err.is_timeout());
        assert!(!err.is_procedure_not_found());
        assert_eq!(err.to_string(), "timed out after 1.5s waiting for 'get' on relay");
    }
}
