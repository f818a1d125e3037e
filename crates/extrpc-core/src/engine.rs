//! Browser engine descriptor.
//!
//! The engine is resolved once during wiring and handed to every component
//! that needs it. It decides two things about the messaging primitives:
//!
//! - whether a web page can message the background directly
//!   (`externally_connectable`), which only Chromium supports;
//! - how long a native response channel stays open after the listener returns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving the engine descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The descriptor names no supported engine.
    #[error("unexpected browser engine '{0}', expected either 'chromium' or 'firefox'")]
    Unrecognized(String),
}

/// The browser engine hosting the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Chrome, Edge, Brave and other Chromium derivatives.
    Chromium,
    /// Firefox.
    Firefox,
}

/// Lifetime of a native response channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// The channel closes when the listener returns unless it signalled that
    /// it will respond asynchronously.
    RequiresAsyncSignal,
    /// The channel stays open while any responder handle is alive.
    OpenWhileHeld,
}

impl Engine {
    /// Parses an engine descriptor such as `"chromium"` or `"firefox"`.
    pub fn from_descriptor(descriptor: &str) -> Result<Self, EngineError> {
        match descriptor.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Self::Chromium),
            "firefox" => Ok(Self::Firefox),
            _ => Err(EngineError::Unrecognized(descriptor.to_string())),
        }
    }

    /// Returns the canonical descriptor string.
    pub fn descriptor(&self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Firefox => "firefox",
        }
    }

    /// Whether a web page can send messages straight to the background.
    pub fn supports_direct_page_messaging(&self) -> bool {
        matches!(self, Self::Chromium)
    }

    /// Response channel policy of the native messaging API.
    pub fn response_policy(&self) -> ResponsePolicy {
        match self {
            Self::Chromium => ResponsePolicy::OpenWhileHeld,
            Self::Firefox => ResponsePolicy::RequiresAsyncSignal,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor())
    }
}

impl FromStr for Engine {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_descriptor(s)
    }
}
