//! Simulate command: one call across an in-process extension.
//!
//! Boots an [`ExtensionHost`], wires the background, the relay and the web
//! page for one tab, and performs a single call from the chosen side.
//!
//! The background serves `save`, `get` and a sample `scrape-votes`; the page
//! serves `page-info`.

use std::time::Duration;

use extrpc_core::Engine;
use extrpc_server::{ProcedureRegistry, StorageArea, register_storage_procedures};
use extrpc_transport::{ExtensionHost, TabId};
use serde_json::{Value, json};
use tracing::info;

use crate::cli::Caller;
use crate::client::RpcClient;
use crate::config::RpcConfig;
use crate::error::{ClientError, ClientResult};
use crate::wiring::{
    BackgroundContext, RelayContext, WebPageContext, WiringError, background_client,
    wire_background, wire_relay, wire_web_page,
};

/// What to simulate.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Engine of the simulated browser.
    pub engine: Engine,
    /// Extension id the page addresses.
    pub extension_id: String,
    /// Tab to wire; the first tab when unset.
    pub tab: Option<u32>,
    /// Procedure to call.
    pub procedure: String,
    /// Procedure arguments.
    pub args: Value,
    /// Side making the call.
    pub from: Caller,
    /// Upper bound for the call.
    pub call_timeout: Option<Duration>,
}

impl SimulateOptions {
    /// Builds options from the configuration and command-line overrides.
    pub fn from_config(
        config: &RpcConfig,
        engine: Option<&str>,
        procedure: String,
        args: Option<&str>,
        from: Caller,
        timeout_secs: Option<u64>,
    ) -> ClientResult<Self> {
        let engine = match engine {
            Some(descriptor) => Engine::from_descriptor(descriptor),
            None => config.engine(),
        }
        .map_err(WiringError::from)?;

        let args = match args {
            Some(text) => serde_json::from_str(text).map_err(|source| ClientError::Serde {
                procedure: procedure.clone(),
                source,
            })?,
            None => Value::Null,
        };

        Ok(Self {
            engine,
            extension_id: config.extension_id.clone(),
            tab: config.tab_id,
            procedure,
            args,
            from,
            call_timeout: timeout_secs
                .map(Duration::from_secs)
                .or_else(|| config.call_timeout()),
        })
    }
}

/// The three wired contexts of one simulated tab.
#[derive(Debug)]
pub struct Simulation {
    /// The simulated browser.
    pub host: ExtensionHost,
    /// Background server.
    pub background: BackgroundContext,
    /// Background client for the wired tab.
    pub background_client: RpcClient,
    /// Content-script relay.
    pub relay: RelayContext,
    /// Web page context.
    pub page: WebPageContext,
    /// Storage behind `save` and `get`.
    pub storage: StorageArea,
}

/// Boots a host and wires all three contexts.
pub fn boot(options: &SimulateOptions) -> ClientResult<Simulation> {
    let host = ExtensionHost::new(options.engine, options.extension_id.clone());
    let tab = open_tabs(&host, options.tab);

    let storage = StorageArea::new();
    let mut background_procedures = ProcedureRegistry::new();
    register_storage_procedures(&mut background_procedures, storage.clone())?;
    background_procedures
        .register_promise_procedure("scrape-votes", |_| async { Ok(json!({"count": 7})) })?;

    let engine = options.engine;
    let mut page_procedures = ProcedureRegistry::new();
    page_procedures
        .register_promise_procedure("page-info", move |_| async move {
            Ok(json!({"engine": engine.descriptor(), "tab": tab.0}))
        })?;

    let background = wire_background(engine, &host, background_procedures)?;
    let to_page = background_client(engine, &host, tab)?.with_call_timeout(options.call_timeout);
    let relay = wire_relay(engine, &host, tab)?;
    let mut page = wire_web_page(
        engine,
        &host,
        tab,
        &options.extension_id,
        page_procedures,
    )?;

    page.client = page.client.with_call_timeout(options.call_timeout);

    Ok(Simulation {
        host,
        background,
        background_client: to_page,
        relay,
        page,
        storage,
    })
}

/// Opens tabs until `requested` exists and returns the tab to wire.
fn open_tabs(host: &ExtensionHost, requested: Option<u32>) -> TabId {
    let mut tab = host.open_tab();
    match requested {
        Some(id) => {
            while tab.id.0 < id {
                tab = host.open_tab();
            }
            TabId(id)
        }
        None => tab.id,
    }
}

/// Runs the simulation and returns the call's result.
pub async fn simulate(options: &SimulateOptions) -> ClientResult<Value> {
    let simulation = boot(options)?;
    let client = match options.from {
        Caller::WebPage => &simulation.page.client,
        Caller::Background => &simulation.background_client,
    };

    info!(
        engine = %options.engine,
        from = ?options.from,
        procedure = %options.procedure,
        "simulating call"
    );
    client
        .exec_remote_procedure(&options.procedure, options.args.clone())
        .await
}

/// Runs the simulation and prints the result as JSON.
pub async fn run(options: &SimulateOptions) -> ClientResult<()> {
    let value = simulate(options).await?;
    let text = serde_json::to_string_pretty(&value).map_err(|source| ClientError::Serde {
        procedure: options.procedure.clone(),
        source,
    })?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(engine: Engine, procedure: &str, args: Value, from: Caller) -> SimulateOptions {
        SimulateOptions {
            engine,
            extension_id: "ext".to_string(),
            tab: None,
            procedure: procedure.to_string(),
            args,
            from,
            call_timeout: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test]
    async fn page_calls_background_on_both_engines() {
        for engine in [Engine::Chromium, Engine::Firefox] {
            let value = simulate(&options(engine, "scrape-votes", Value::Null, Caller::WebPage))
                .await
                .unwrap();
            assert_eq!(value, json!({"count": 7}));
        }
    }

    #[tokio::test]
    async fn background_calls_page_on_both_engines() {
        for engine in [Engine::Chromium, Engine::Firefox] {
            let value = simulate(&options(engine, "page-info", Value::Null, Caller::Background))
                .await
                .unwrap();
            assert_eq!(value, json!({"engine": engine.descriptor(), "tab": 1}));
        }
    }

    #[tokio::test]
    async fn requested_tab_is_wired() {
        let mut opts = options(Engine::Firefox, "page-info", Value::Null, Caller::Background);
        opts.tab = Some(3);
        let value = simulate(&opts).await.unwrap();
        assert_eq!(value["tab"], 3);

        opts.tab = Some(0);
        assert!(matches!(
            simulate(&opts).await,
            Err(ClientError::Wiring(_))
        ));
    }

    #[test]
    fn options_from_config() {
        let config = RpcConfig {
            engine: "firefox".to_string(),
            call_timeout_secs: Some(9),
            ..RpcConfig::default()
        };

        let opts = SimulateOptions::from_config(
            &config,
            None,
            "get".to_string(),
            Some(r#"{"key": "x"}"#),
            Caller::WebPage,
            None,
        )
        .unwrap();
        assert_eq!(opts.engine, Engine::Firefox);
        assert_eq!(opts.args, json!({"key": "x"}));
        assert_eq!(opts.call_timeout, Some(Duration::from_secs(9)));

        let err = SimulateOptions::from_config(
            &config,
            Some("netscape"),
            "get".to_string(),
            None,
            Caller::WebPage,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("netscape"));

        let err = SimulateOptions::from_config(
            &config,
            None,
            "get".to_string(),
            Some("{not json"),
            Caller::WebPage,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Serde { .. }));
    }
}
