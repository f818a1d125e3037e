//! Core types: endpoint roles, engine descriptor, tracing setup

pub mod engine;
pub mod role;
pub mod tracing;

pub use engine::{Engine, EngineError, ResponsePolicy};
pub use role::{EndpointRole, RoleError};
pub use crate::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
