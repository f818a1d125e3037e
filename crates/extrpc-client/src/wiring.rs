//! Per-engine assembly of servers, clients and the relay.
//!
//! | Link              | Chromium                                        | Firefox                                         |
//! |-------------------|-------------------------------------------------|-------------------------------------------------|
//! | page → background | direct callback over external messaging         | broadcast on the window, forwarded by the relay |
//! | background → page | relayed one-way, page replies over external     | direct callback over tab messaging, relay captures the page reply |
//!
//! The background server listens on host-wide channels, so it is wired once
//! per host with [`wire_background`]. Each tab then gets its own background
//! client from [`background_client`], a relay from [`wire_relay`] and a page
//! from [`wire_web_page`].
//!
//! The engine is resolved once by the caller and passed to each function. A
//! host running a different engine is rejected before any listener is
//! installed.

use std::sync::Arc;

use extrpc_core::{EndpointRole, Engine, EngineError};
use extrpc_server::{ProcedureRegistry, Relay, RpcServer, ServerConfig, ServerError};
use extrpc_transport::{ExtensionHost, Tab, TabId, Transport, TransportError};
use thiserror::Error;
use tracing::{debug, info};

use crate::client::RpcClient;

/// Result type for wiring.
pub type WiringResult<T> = Result<T, WiringError>;

/// Errors raised while wiring a context.
#[derive(Debug, Error)]
pub enum WiringError {
    /// The engine descriptor is not recognized.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The host runs a different engine than the one being wired.
    #[error("host runs {host} but {requested} wiring was requested")]
    EngineMismatch { host: Engine, requested: Engine },

    /// A channel needed by the context is unavailable.
    #[error("cannot wire the {role} context: {source}")]
    Transport {
        role: EndpointRole,
        #[source]
        source: TransportError,
    },

    /// A server or relay could not start listening.
    #[error(transparent)]
    Server(#[from] ServerError),
}

impl WiringError {
    fn transport(role: EndpointRole) -> impl FnOnce(TransportError) -> Self {
        move |source| Self::Transport { role, source }
    }
}

/// Background context: the one server answering every tab's page.
#[derive(Debug)]
pub struct BackgroundContext {
    /// Serves `background` requests.
    pub server: RpcServer,
}

/// Content-script context.
#[derive(Debug)]
pub struct RelayContext {
    /// The listening relay.
    pub relay: Relay,
}

/// Web page context: a server for background requests and a client calling
/// the background.
#[derive(Debug)]
pub struct WebPageContext {
    /// Serves `web-page` requests.
    pub server: RpcServer,
    /// Calls procedures on the background.
    pub client: RpcClient,
}

fn check_engine(engine: Engine, host: &ExtensionHost) -> WiringResult<()> {
    if host.engine() != engine {
        return Err(WiringError::EngineMismatch {
            host: host.engine(),
            requested: engine,
        });
    }
    Ok(())
}

fn open_tab(host: &ExtensionHost, tab: TabId, role: EndpointRole) -> WiringResult<Tab> {
    host.tab(tab).map_err(WiringError::transport(role))
}

/// Wires the background server of `host`.
///
/// Call once per host: the server listens on the host-wide runtime or
/// external channel, and a second background server there would dispatch
/// every request twice.
pub fn wire_background(
    engine: Engine,
    host: &ExtensionHost,
    registry: ProcedureRegistry,
) -> WiringResult<BackgroundContext> {
    check_engine(engine, host)?;
    let role = EndpointRole::Background;

    let inbound: Arc<dyn Transport> = match engine {
        Engine::Chromium => host
            .external(host.extension_id())
            .map_err(WiringError::transport(role))?,
        Engine::Firefox => host.runtime(),
    };

    let server = RpcServer::new(ServerConfig::new(role), inbound, registry);
    server.listen()?;

    info!(engine = %engine, role = %role, "wired");
    Ok(BackgroundContext { server })
}

/// Builds a background client calling the page in `tab` through its relay.
pub fn background_client(
    engine: Engine,
    host: &ExtensionHost,
    tab: TabId,
) -> WiringResult<RpcClient> {
    check_engine(engine, host)?;
    let role = EndpointRole::Background;
    let tab = open_tab(host, tab, role)?;
    let content_script: Arc<dyn Transport> = tab.content_script;

    let client = match engine {
        Engine::Chromium => {
            let external: Arc<dyn Transport> = host
                .external(host.extension_id())
                .map_err(WiringError::transport(role))?;
            RpcClient::broadcast(EndpointRole::Relay, role, content_script, external)
        }
        Engine::Firefox => RpcClient::direct(EndpointRole::Relay, role, content_script)
            .capturing_return_value(true),
    };

    debug!(engine = %engine, tab = %tab.id, strategy = client.strategy().name(), "background client ready");
    Ok(client)
}

/// Wires the content-script relay of `tab`.
pub fn wire_relay(engine: Engine, host: &ExtensionHost, tab: TabId) -> WiringResult<RelayContext> {
    check_engine(engine, host)?;
    let tab = open_tab(host, tab, EndpointRole::Relay)?;

    let relay = Relay::new(engine, tab.window, tab.content_script, host.runtime());
    relay.listen()?;

    info!(engine = %engine, role = %EndpointRole::Relay, "wired");
    Ok(RelayContext { relay })
}

/// Wires the web page in `tab`, talking to the extension `extension_id`.
pub fn wire_web_page(
    engine: Engine,
    host: &ExtensionHost,
    tab: TabId,
    extension_id: &str,
    registry: ProcedureRegistry,
) -> WiringResult<WebPageContext> {
    check_engine(engine, host)?;
    let role = EndpointRole::WebPage;
    let tab = open_tab(host, tab, role)?;
    let window: Arc<dyn Transport> = tab.window;

    let (config, client) = match engine {
        Engine::Chromium => {
            let external: Arc<dyn Transport> = host
                .external(extension_id)
                .map_err(WiringError::transport(role))?;
            let config = ServerConfig::new(role).with_reply_transport(external.clone());
            let client = RpcClient::direct(EndpointRole::Background, role, external);
            (config, client)
        }
        Engine::Firefox => {
            let client =
                RpcClient::broadcast(EndpointRole::Relay, role, window.clone(), window.clone());
            (ServerConfig::new(role), client)
        }
    };

    let server = RpcServer::new(config, window, registry);
    server.listen()?;

    info!(engine = %engine, role = %role, strategy = client.strategy().name(), "wired");
    Ok(WebPageContext { server, client })
}
