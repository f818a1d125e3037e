//! Named procedures and dispatch.
//!
//! Procedures come in two styles. Promise-style handlers return a future.
//! Callback-style handlers receive a [`Resolver`] and complete the call by
//! invoking it, which fits callback-shaped host APIs such as extension
//! storage. Both are stored as the same boxed handler, so dispatch does not
//! care which style registered a name.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{DispatchError, ProcedureError, RegistryError};

/// Future returned by a procedure handler.
pub type ProcedureFuture = Pin<Box<dyn Future<Output = Result<Value, ProcedureError>> + Send>>;

type Handler = Arc<dyn Fn(Value) -> ProcedureFuture + Send + Sync>;

/// Completes a callback-style procedure call.
///
/// Dropping a resolver without calling it fails the call.
#[derive(Debug)]
pub struct Resolver {
    tx: oneshot::Sender<Result<Value, ProcedureError>>,
}

impl Resolver {
    /// Completes the call with a return value.
    pub fn resolve(self, value: Value) {
        let _ = self.tx.send(Ok(value));
    }

    /// Fails the call.
    pub fn reject(self, error: impl Into<ProcedureError>) {
        let _ = self.tx.send(Err(error.into()));
    }
}

/// Table of named procedures owned by one server.
#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Handler>,
}

impl ProcedureRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler returning a future.
    pub fn register_promise_procedure<F, Fut>(
        &mut self,
        name: impl Into<String>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProcedureError>> + Send + 'static,
    {
        self.insert(
            name.into(),
            Arc::new(move |args| Box::pin(handler(args)) as ProcedureFuture),
        )
    }

    /// Registers a handler that completes through a [`Resolver`].
    pub fn register_callback_procedure<F>(
        &mut self,
        name: impl Into<String>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(Value, Resolver) + Send + Sync + 'static,
    {
        let name = name.into();
        let handler = Arc::new(handler);
        let procedure = name.clone();
        self.insert(
            name,
            Arc::new(move |args| {
                let handler = handler.clone();
                let procedure = procedure.clone();
                Box::pin(async move {
                    let (tx, rx) = oneshot::channel();
                    handler(args, Resolver { tx });
                    rx.await.unwrap_or_else(|_| {
                        Err(ProcedureError::new(format!(
                            "procedure '{procedure}' dropped its resolver without a result"
                        )))
                    })
                }) as ProcedureFuture
            }),
        )
    }

    /// Invokes the procedure registered under `name`.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, DispatchError> {
        let handler = self
            .procedures
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::procedure_not_found(name))?;

        debug!(procedure = %name, "dispatching");
        handler(args).await.map_err(|source| DispatchError::Failed {
            name: name.to_string(),
            source,
        })
    }

    /// Returns true if a procedure is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Registered procedure names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    fn insert(&mut self, name: String, handler: Handler) -> Result<(), RegistryError> {
        if self.procedures.contains_key(&name) {
            return Err(RegistryError::DuplicateProcedure { name });
        }
        self.procedures.insert(name, handler);
        Ok(())
    }
}

impl fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureRegistry")
            .field("procedures", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get_handler(args: Value) -> Value {
        json!({"key": args["key"], "value": 42})
    }

    #[tokio::test]
    async fn promise_procedure_round_trip() {
        let mut registry = ProcedureRegistry::new();
        registry
            .register_promise_procedure("get", |args| async move { Ok(get_handler(args)) })
            .unwrap();

        let value = registry.dispatch("get", json!({"key": "x"})).await.unwrap();
        assert_eq!(value, json!({"key": "x", "value": 42}));
    }

    #[tokio::test]
    async fn callback_procedure_matches_promise_procedure() {
        let mut registry = ProcedureRegistry::new();
        registry
            .register_promise_procedure("promise", |args| async move { Ok(get_handler(args)) })
            .unwrap();
        registry
            .register_callback_procedure("callback", |args, resolver| {
                resolver.resolve(get_handler(args));
            })
            .unwrap();

        let args = json!({"key": "x"});
        assert_eq!(
            registry.dispatch("promise", args.clone()).await,
            registry.dispatch("callback", args).await
        );
    }

    #[tokio::test]
    async fn callback_resolving_from_another_task() {
        let mut registry = ProcedureRegistry::new();
        registry
            .register_callback_procedure("later", |args, resolver| {
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    resolver.resolve(args);
                });
            })
            .unwrap();

        assert_eq!(registry.dispatch("later", json!(7)).await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn missing_procedure_is_an_error() {
        let registry = ProcedureRegistry::new();
        let err = registry.dispatch("scrape-votes", json!(null)).await.unwrap_err();
        assert_eq!(err, DispatchError::procedure_not_found("scrape-votes"));
        assert!(err.to_string().contains("scrape-votes"));
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let mut registry = ProcedureRegistry::new();
        registry
            .register_promise_procedure("fail", |_| async { Err(ProcedureError::new("boom")) })
            .unwrap();
        registry
            .register_callback_procedure("reject", |_, resolver| resolver.reject("nope"))
            .unwrap();
        registry
            .register_callback_procedure("forget", |_, _resolver| {})
            .unwrap();

        assert!(matches!(
            registry.dispatch("fail", json!(null)).await,
            Err(DispatchError::Failed { .. })
        ));
        let rejected = registry.dispatch("reject", json!(null)).await.unwrap_err();
        assert_eq!(rejected.to_remote().message, "nope");

        let forgotten = registry.dispatch("forget", json!(null)).await.unwrap_err();
        assert!(forgotten.to_string().contains("dropped its resolver"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ProcedureRegistry::new();
        registry
            .register_promise_procedure("save", |_| async { Ok(json!(true)) })
            .unwrap();
        let err = registry
            .register_callback_procedure("save", |_, resolver| resolver.resolve(json!(false)))
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::DuplicateProcedure {
                name: "save".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = ProcedureRegistry::new();
        for name in ["save", "get", "expand-posts"] {
            registry
                .register_promise_procedure(name, |_| async { Ok(Value::Null) })
                .unwrap();
        }
        assert_eq!(registry.names(), vec!["expand-posts", "get", "save"]);
        assert!(registry.contains("get"));
        assert!(!registry.contains("scrape-votes"));
    }
}
