//! RPC client, per-engine wiring, configuration and the `extrpc` CLI
//!
//! A client sends a request envelope to a remote role and waits for the
//! matching reply, either on the request's own response channel
//! ([`CallStrategy::DirectCallback`]) or by watching an inbound channel for a
//! correlated reply ([`CallStrategy::Broadcast`]). The [`wiring`] module puts
//! servers, clients and the relay together for each engine.
//!
//! ```no_run
//! use extrpc_client::{wire_background, wire_relay, wire_web_page};
//! use extrpc_core::Engine;
//! use extrpc_server::{ProcedureRegistry, StorageArea, register_storage_procedures};
//! use extrpc_transport::ExtensionHost;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::Firefox;
//! let host = ExtensionHost::new(engine, "votes@example.org");
//! let tab = host.open_tab();
//!
//! let mut procedures = ProcedureRegistry::new();
//! register_storage_procedures(&mut procedures, StorageArea::new())?;
//!
//! let _background = wire_background(engine, &host, procedures)?;
//! let _relay = wire_relay(engine, &host, tab.id)?;
//! let page = wire_web_page(engine, &host, tab.id, "votes@example.org", ProcedureRegistry::new())?;
//!
//! let saved = page
//!     .client
//!     .exec_remote_procedure("save", json!({"key": "k", "value": 1}))
//!     .await?;
//! assert_eq!(saved, json!(true));
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod wiring;

pub use cli::Cli;
pub use client::{CallStrategy, RpcClient};
pub use config::{LoggingSettings, RpcConfig};
pub use error::{ClientError, ClientResult};
pub use wiring::{
    BackgroundContext, RelayContext, WebPageContext, WiringError, WiringResult, background_client,
    wire_background, wire_relay, wire_web_page,
};
