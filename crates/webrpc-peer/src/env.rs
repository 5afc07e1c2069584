//! Hierarchical naming of functions and values.
//!
//! Names are dot-separated paths into nested mappings. Two scopes exist: the
//! process-wide [`Registry`], populated by the embedding application before
//! connections are accepted, and a per-connection local scope. Reads consult
//! the local scope first and fall back to the registry when the local lookup
//! yields nothing, so a connection can shadow a shared binding without
//! touching it.

use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::callable::{Binding, Callable, CallableProxy};
use crate::error::AddressError;
use crate::value::Value;

/// Result of a successful name lookup.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A plain value (never `Null`).
    Value(Value),
    /// A function, wrapped for invocation.
    Callable(CallableProxy),
}

impl Resolved {
    /// Converts back to a value; callables become [`Value::Function`].
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Callable(proxy) => Value::Function(proxy.callable().clone()),
        }
    }
}

/// One scope: a mapping tree behind a lock.
#[derive(Debug, Clone)]
pub(crate) struct Scope(Arc<RwLock<Value>>);

impl Default for Scope {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(Value::object())))
    }
}

impl Scope {
    fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Value> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, path: &str) -> Result<Option<Resolved>, AddressError> {
        if path.is_empty() {
            return Ok(None);
        }
        let root = self.read();
        Ok(match root.lookup(path)? {
            None | Some(Value::Null) => None,
            Some(Value::Function(callable)) => Some(Resolved::Callable(CallableProxy::bound(
                callable.clone(),
                Binding {
                    scope: self.0.clone(),
                    path: path.to_string(),
                },
            ))),
            Some(value) => Some(Resolved::Value(value.clone())),
        })
    }

    fn set(&self, path: &str, value: Value) -> Result<(), AddressError> {
        self.write().insert(path, value)
    }
}

/// The process-wide scope shared by every connection.
#[derive(Debug, Default)]
pub struct Registry {
    scope: Scope,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registry used by peers created with [`Peer::new`](crate::Peer::new).
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Registry::new())).clone()
    }

    /// Registers a function. Its pipe and one-shot flags travel with it.
    pub fn provide(&self, path: &str, callable: Callable) -> Result<(), AddressError> {
        self.scope.set(path, Value::Function(callable))
    }

    /// Writes a shared value.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<(), AddressError> {
        self.scope.set(path, value.into())
    }

    /// Reads a shared value.
    pub fn get(&self, path: &str) -> Result<Option<Resolved>, AddressError> {
        self.scope.get(path)
    }
}

/// A connection's view of the namespace: its local scope over the registry.
#[derive(Debug, Clone)]
pub struct Environment {
    global: Arc<Registry>,
    local: Scope,
}

impl Environment {
    /// Creates an environment with an empty local scope.
    pub fn new(global: Arc<Registry>) -> Self {
        Self {
            global,
            local: Scope::default(),
        }
    }

    /// The shared registry behind this environment.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.global
    }

    /// Looks a name up, local scope first.
    ///
    /// A miss is `Ok(None)`. Traversing a non-mapping is an error and does
    /// not fall back to the registry.
    pub fn get(&self, path: &str) -> Result<Option<Resolved>, AddressError> {
        match self.local.get(path)? {
            Some(found) => Ok(Some(found)),
            None => self.global.get(path),
        }
    }

    /// Writes into the local scope, creating intermediate mappings.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<(), AddressError> {
        self.local.set(path, value.into())
    }

    /// Registers a function in the local scope only.
    pub fn provide(&self, path: &str, callable: Callable) -> Result<(), AddressError> {
        self.local.set(path, Value::Function(callable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(resolved: Option<Resolved>) -> Option<Value> {
        resolved.map(Resolved::into_value)
    }

    #[test]
    fn local_shadows_global() {
        let registry = Arc::new(Registry::new());
        registry.set("a.b", 1).unwrap();

        let first = Environment::new(registry.clone());
        let second = Environment::new(registry.clone());
        first.set("a.b", 2).unwrap();

        assert_eq!(value(first.get("a.b").unwrap()), Some(Value::from(2)));
        assert_eq!(value(second.get("a.b").unwrap()), Some(Value::from(1)));
        assert_eq!(value(registry.get("a.b").unwrap()), Some(Value::from(1)));
    }

    #[test]
    fn local_null_falls_through() {
        let registry = Arc::new(Registry::new());
        registry.set("x", "shared").unwrap();
        let env = Environment::new(registry);
        env.set("x", Value::Null).unwrap();

        assert_eq!(value(env.get("x").unwrap()), Some(Value::from("shared")));
    }

    #[test]
    fn miss_is_none() {
        let env = Environment::new(Arc::new(Registry::new()));
        assert!(env.get("nothing.here").unwrap().is_none());
        assert!(env.get("").unwrap().is_none());
    }

    #[test]
    fn local_addressing_error_propagates() {
        let registry = Arc::new(Registry::new());
        registry.set("a.b", 1).unwrap();
        let env = Environment::new(registry);
        env.set("a", "scalar").unwrap();

        assert!(env.get("a.b").is_err());
    }

    #[test]
    fn functions_resolve_to_proxies() {
        let registry = Arc::new(Registry::new());
        registry
            .provide("math.add", Callable::plain(|_, _| async { Ok(Value::Null) }).once())
            .unwrap();
        let env = Environment::new(registry.clone());

        let Some(Resolved::Callable(proxy)) = env.get("math.add").unwrap() else {
            panic!("expected a callable");
        };
        assert!(proxy.is_one_shot());
        assert!(!proxy.is_pipe_only());

        proxy.clear();
        assert!(env.get("math.add").unwrap().is_none());
        assert!(registry.get("math.add").unwrap().is_none());
    }

    #[test]
    fn set_writes_nested_values() {
        let env = Environment::new(Arc::new(Registry::new()));
        env.set("config", Value::from(json!({"theme": "dark"}))).unwrap();
        env.set("config.size", 3).unwrap();

        assert_eq!(
            value(env.get("config").unwrap()).map(|v| v.to_json()),
            Some(json!({"size": 3, "theme": "dark"}))
        );
    }
}
