//! Scoped service container
//!
//! A process-wide base context is populated once at boot. Every inbound
//! request or WebSocket event works against a clone: same service instances
//! (the `Arc`s are shared), independent key table. Binding a request-scoped
//! value into a clone is never visible to the base or to sibling clones,
//! which is the sole mechanism preventing cross-request state leakage.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A bound service instance
pub type Service = Arc<dyn Any + Send + Sync>;

/// Well-known binding keys
pub mod keys {
    pub const ENV: &str = "env";
    pub const CONFIG: &str = "config";
    pub const LOGGER: &str = "logger";
    pub const CACHE: &str = "cache";
    pub const DATABASE: &str = "database";
    pub const ROUTER: &str = "router";
    pub const REQUEST: &str = "request";
    pub const WS_ROUTER: &str = "ws-router";
    pub const WS_SESSIONS: &str = "ws-sessions";
}

/// Per-request container of named service bindings
#[derive(Default)]
pub struct ScopedContext {
    bindings: HashMap<String, Service>,
}

impl ScopedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a service under a key, replacing any previous binding
    pub fn bind<T: Any + Send + Sync>(&mut self, key: impl Into<String>, service: Arc<T>) {
        self.bindings.insert(key.into(), service);
    }

    /// Bind an already type-erased service
    pub fn bind_service(&mut self, key: impl Into<String>, service: Service) {
        self.bindings.insert(key.into(), service);
    }

    /// Resolve a binding, downcast to its concrete type
    pub fn resolve<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.bindings
            .get(key)
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    /// Shallow copy: same service instances, independent key table.
    ///
    /// O(number of bindings); bound instances are never deep-copied.
    pub fn clone_scope(&self) -> Self {
        Self {
            bindings: self.bindings.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
