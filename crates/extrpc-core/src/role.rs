//! Logical participants of an RPC link.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing a role name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    /// The name matches no endpoint role.
    #[error("unknown endpoint role '{0}', expected 'background', 'relay' or 'web-page'")]
    Unrecognized(String),
}

/// One side of an RPC link.
///
/// Every envelope names the role that should accept it. A server only ever
/// dispatches envelopes addressed to its own role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointRole {
    /// The extension background (or service worker) context.
    Background,
    /// The content-script bridge that forwards between page and background.
    Relay,
    /// The untrusted web page.
    WebPage,
}

impl EndpointRole {
    /// All roles, in wire order.
    pub const ALL: [EndpointRole; 3] = [Self::Background, Self::Relay, Self::WebPage];

    /// Returns the wire string for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Relay => "relay",
            Self::WebPage => "web-page",
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointRole {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| RoleError::Unrecognized(s.to_string()))
    }
}
