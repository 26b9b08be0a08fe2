//! Callable module registry
//!
//! Maps `(module, method)` pairs to handlers. Pairs without an entry resolve
//! through the context's global namespace as `globalThis[module][method]`.
//!
//! # Example
//!
//! ```
//! use scriptbridge::bridge::{Handler, ModuleRegistry};
//!
//! let mut registry = ModuleRegistry::new();
//! registry.register("Math", "add", Handler::script("add"));
//! assert!(registry.resolve("Math", "add").is_some());
//! assert!(registry.resolve("Math", "sub").is_none());
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::engine::HostFunction;

/// Target of a registered method.
#[derive(Clone)]
pub enum Handler {
    /// Dotted path resolved from the global object at call time
    Script(Vec<String>),
    /// Host function run on the executor thread
    Native(HostFunction),
}

impl Handler {
    /// Script handler from a dotted path such as `"App.router.push"`.
    pub fn script(path: &str) -> Self {
        Handler::Script(
            path.split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn native<F>(function: F) -> Self
    where
        F: Fn(&[JsonValue]) -> Result<JsonValue, String> + Send + Sync + 'static,
    {
        Handler::Native(Arc::new(function))
    }
}

impl fmt::Debug for Handler {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Handler::Script(path) => write!(f, "Script({})", path.join(".")),
            Handler::Native(_) => write!(f, "Native(..)"),
        }
    }
}

/// Registry of callable modules.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, IndexMap<String, Handler>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning the one it replaces.
    pub fn register(
        &mut self,
        module: &str,
        method: &str,
        handler: Handler,
    ) -> Option<Handler> {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(method.to_string(), handler)
    }

    pub fn unregister(
        &mut self,
        module: &str,
        method: &str,
    ) -> Option<Handler> {
        let methods = self.modules.get_mut(module)?;
        let removed = methods.shift_remove(method);
        if methods.is_empty() {
            self.modules.shift_remove(module);
        }
        removed
    }

    pub fn resolve(
        &self,
        module: &str,
        method: &str,
    ) -> Option<&Handler> {
        self.modules.get(module)?.get(method)
    }

    /// Module names in registration order
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Method names of `module` in registration order
    pub fn methods(
        &self,
        module: &str,
    ) -> Vec<&str> {
        self.modules
            .get(module)
            .map(|methods| methods.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Number of registered methods
    pub fn len(&self) -> usize {
        self.modules.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_map().entries(self.modules.iter()).finish()
    }
}
