//! Named service handlers.
//!
//! Route and task configuration refer to handlers by service name. A
//! [`Services`] registry maps those names to the handlers the application
//! registered at startup, and turns configured bindings into
//! [`RouteEntry`] values for the engine.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::RouteEntry;
use crate::error::{DispatchError, DispatchResult};
use crate::handler::BoxedHandler;

/// Registry of handlers keyed by service name. Clones share one registry.
#[derive(Clone, Default)]
pub struct Services {
    handlers: Arc<RwLock<HashMap<String, BoxedHandler>>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, returning the handler it replaced.
    pub fn register(&self, name: impl Into<String>, handler: BoxedHandler) -> Option<BoxedHandler> {
        self.handlers.write().insert(name.into(), handler)
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(self, name: impl Into<String>, handler: BoxedHandler) -> Self {
        self.register(name, handler);
        self
    }

    pub fn unregister(&self, name: &str) -> Option<BoxedHandler> {
        self.handlers.write().remove(name)
    }

    /// Looks up a handler by name.
    pub fn get(&self, name: &str) -> DispatchResult<BoxedHandler> {
        self.handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownService(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Builds a route entry binding `method` and `pattern` to the handler
    /// registered as `service`.
    pub fn route(&self, method: &str, pattern: &str, service: &str) -> DispatchResult<RouteEntry> {
        Ok(RouteEntry::new(method, pattern, self.get(service)?))
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("names", &self.names())
            .finish()
    }
}
