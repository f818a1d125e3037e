//! Server configuration.

use std::sync::Arc;

use extrpc_core::EndpointRole;
use extrpc_transport::Transport;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Role whose requests this server accepts.
    pub role: EndpointRole,

    /// Tag written into outgoing replies. Requests carrying it are ignored.
    pub sender_tag: String,

    /// Transport replies are posted on when a request has no native response
    /// channel. Defaults to the transport the server listens on.
    pub reply_transport: Option<Arc<dyn Transport>>,
}

impl ServerConfig {
    /// Creates a configuration for a server with the given role.
    pub fn new(role: EndpointRole) -> Self {
        Self {
            role,
            sender_tag: default_sender_tag(role),
            reply_transport: None,
        }
    }

    /// Builder: set the sender tag.
    pub fn with_sender_tag(mut self, tag: impl Into<String>) -> Self {
        self.sender_tag = tag.into();
        self
    }

    /// Builder: set the reply transport.
    pub fn with_reply_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.reply_transport = Some(transport);
        self
    }
}

/// Returns the default sender tag for a server role, e.g. `web-page-server`.
pub fn default_sender_tag(role: EndpointRole) -> String {
    format!("{role}-server")
}
