//! In-process model of a browser hosting one extension.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use extrpc_core::Engine;
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::native::NativeChannel;
use crate::window::WindowChannel;

/// Browser tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channels belonging to one open tab.
#[derive(Debug, Clone)]
pub struct Tab {
    /// Tab id.
    pub id: TabId,
    /// The page's `postMessage` bus, shared with the content script.
    pub window: Arc<WindowChannel>,
    /// `tabs.sendMessage` toward the tab's content script.
    pub content_script: Arc<NativeChannel>,
}

/// A browser hosting one extension.
///
/// Owns the background's runtime channel (content scripts to background),
/// the external channel (pages to background, Chromium only) and the open
/// tabs.
#[derive(Debug)]
pub struct ExtensionHost {
    engine: Engine,
    extension_id: String,
    runtime: Arc<NativeChannel>,
    external: Option<Arc<NativeChannel>>,
    tabs: Mutex<HashMap<TabId, Tab>>,
    next_tab: AtomicU32,
}

impl ExtensionHost {
    /// Creates a host for `engine` serving the extension `extension_id`.
    pub fn new(engine: Engine, extension_id: impl Into<String>) -> Self {
        let policy = engine.response_policy();
        let external = engine
            .supports_direct_page_messaging()
            .then(|| Arc::new(NativeChannel::new("runtime.onMessageExternal", policy)));

        Self {
            engine,
            extension_id: extension_id.into(),
            runtime: Arc::new(NativeChannel::new("runtime.onMessage", policy)),
            external,
            tabs: Mutex::new(HashMap::new()),
            next_tab: AtomicU32::new(1),
        }
    }

    /// The hosting engine.
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Id of the hosted extension.
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Opens a tab and returns its channels.
    pub fn open_tab(&self) -> Tab {
        let id = TabId(self.next_tab.fetch_add(1, Ordering::Relaxed));
        let tab = Tab {
            id,
            window: Arc::new(WindowChannel::new(format!("tab-{id}.window"))),
            content_script: Arc::new(NativeChannel::new(
                format!("tab-{id}.tabs.sendMessage"),
                self.engine.response_policy(),
            )),
        };
        self.lock_tabs().insert(id, tab.clone());
        debug!(engine = %self.engine, tab = %id, "opened tab");
        tab
    }

    /// Looks up an open tab.
    pub fn tab(&self, id: TabId) -> TransportResult<Tab> {
        self.lock_tabs()
            .get(&id)
            .cloned()
            .ok_or(TransportError::UnknownTab(id))
    }

    /// Closes a tab. Returns false if it was not open.
    pub fn close_tab(&self, id: TabId) -> bool {
        self.lock_tabs().remove(&id).is_some()
    }

    /// Channel content scripts use to reach the background.
    pub fn runtime(&self) -> Arc<NativeChannel> {
        self.runtime.clone()
    }

    /// Channel a web page uses to reach the background of `extension_id`.
    pub fn external(&self, extension_id: &str) -> TransportResult<Arc<NativeChannel>> {
        let channel = self
            .external
            .clone()
            .ok_or(TransportError::ExternalMessagingUnsupported {
                engine: self.engine,
            })?;
        if extension_id != self.extension_id {
            return Err(TransportError::UnknownExtension(extension_id.to_string()));
        }
        Ok(channel)
    }

    fn lock_tabs(&self) -> MutexGuard<'_, HashMap<TabId, Tab>> {
        self.tabs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transport;
    use extrpc_core::ResponsePolicy;

    #[test]
    fn tabs_get_distinct_channels() {
        let host = ExtensionHost::new(Engine::Firefox, "ext");
        let first = host.open_tab();
        let second = host.open_tab();

        assert_ne!(first.id, second.id);
        assert!(!Arc::ptr_eq(&first.window, &second.window));
        assert_eq!(
            first.content_script.policy(),
            ResponsePolicy::RequiresAsyncSignal
        );
        assert!(first.window.name().contains(&first.id.to_string()));

        let looked_up = host.tab(first.id).unwrap();
        assert!(Arc::ptr_eq(&looked_up.window, &first.window));
    }

    #[test]
    fn closed_tab_is_unknown() {
        let host = ExtensionHost::new(Engine::Chromium, "ext");
        let tab = host.open_tab();
        assert!(host.close_tab(tab.id));
        assert!(!host.close_tab(tab.id));
        assert_eq!(host.tab(tab.id).unwrap_err(), TransportError::UnknownTab(tab.id));
    }

    #[test]
    fn external_messaging_is_chromium_only() {
        let firefox = ExtensionHost::new(Engine::Firefox, "ext");
        assert_eq!(
            firefox.external("ext").unwrap_err(),
            TransportError::ExternalMessagingUnsupported {
                engine: Engine::Firefox
            }
        );

        let chromium = ExtensionHost::new(Engine::Chromium, "ext");
        assert!(chromium.external("ext").is_ok());
        assert_eq!(
            chromium.external("other").unwrap_err(),
            TransportError::UnknownExtension("other".to_string())
        );
        assert_eq!(chromium.runtime().policy(), ResponsePolicy::OpenWhileHeld);
    }
}
