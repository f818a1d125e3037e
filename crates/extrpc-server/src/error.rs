//! Server error types.

use extrpc_core::EndpointRole;
use extrpc_protocol::{ErrorCode, RemoteError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while setting up a server or relay.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `listen` was called on an endpoint that is already listening.
    #[error("{role} endpoint is already listening")]
    AlreadyListening { role: EndpointRole },

    /// Listening requires a tokio runtime to spawn dispatch tasks on.
    #[error("no tokio runtime available to dispatch requests")]
    NoRuntime,

    /// Procedure registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ServerError {
    /// Creates an already-listening error.
    pub fn already_listening(role: EndpointRole) -> Self {
        Self::AlreadyListening { role }
    }
}

/// Errors raised while registering procedures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A procedure with this name is already registered.
    #[error("a procedure named '{name}' is already registered")]
    DuplicateProcedure { name: String },
}

/// Failure reported by a procedure handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcedureError {
    message: String,
}

impl ProcedureError {
    /// Creates a procedure error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProcedureError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProcedureError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for ProcedureError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(format!("invalid procedure arguments: {error}"))
    }
}

/// Errors raised by [`ProcedureRegistry::dispatch`](crate::ProcedureRegistry::dispatch).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No procedure is registered under the name.
    #[error("no procedure registered with the name '{name}'")]
    ProcedureNotFound { name: String },

    /// The procedure ran and failed.
    #[error("procedure '{name}' failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: ProcedureError,
    },
}

impl DispatchError {
    /// Creates a procedure-not-found error.
    pub fn procedure_not_found(name: impl Into<String>) -> Self {
        Self::ProcedureNotFound { name: name.into() }
    }

    /// Converts the failure into the error carried back to the caller.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::ProcedureNotFound { name } => RemoteError::procedure_not_found(name),
            Self::Failed { source, .. } => {
                RemoteError::new(ErrorCode::ProcedureFailed, source.message())
            }
        }
    }
}
