//! Procedure registry, RPC server and relay.
//!
//! This crate provides the serving side of extrpc:
//! - [`ProcedureRegistry`]: named promise-style and callback-style procedures
//! - [`RpcServer`]: binds a registry to one transport listener for one role
//! - [`Relay`]: the content-script hop between the page and the background
//! - [`register_storage_procedures`]: the conventional `save` / `get` pair
//!
//! # Example
//!
//! ```rust,no_run
//! use extrpc_core::{EndpointRole, Engine};
//! use extrpc_server::{ProcedureRegistry, RpcServer, ServerConfig};
//! use extrpc_transport::ExtensionHost;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = ExtensionHost::new(Engine::Firefox, "extension-id");
//!
//!     let mut registry = ProcedureRegistry::new();
//!     registry.register_promise_procedure("scrape-votes", |_| async { Ok(json!({"count": 7})) })?;
//!
//!     let server = RpcServer::new(
//!         ServerConfig::new(EndpointRole::Background),
//!         host.runtime(),
//!         registry,
//!     );
//!     server.listen()?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod registry;
mod relay;
mod server;
mod storage;

pub use config::{ServerConfig, default_sender_tag};
pub use error::{DispatchError, ProcedureError, RegistryError, ServerError, ServerResult};
pub use registry::{ProcedureFuture, ProcedureRegistry, Resolver};
pub use relay::{RELAY_SENDER_TAG, Relay};
pub use server::RpcServer;
pub use storage::{GET_PROCEDURE, SAVE_PROCEDURE, StorageArea, register_storage_procedures};
