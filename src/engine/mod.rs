//! Execution contexts
//!
//! An execution context is one interpreter instance together with its global
//! namespace. Engines are pluggable through two traits:
//!
//! ```text
//! Engine (Send + Sync, shared)        ScriptContext (thread-confined)
//!     create_context(options) ──────▶ evaluate / evaluate_bytecode
//!     bytecode_format_version         compile_bytecode
//!                                     install_global / set_global_value
//!                                     call_function(path, args)
//! ```
//!
//! A context is created on the executor's dedicated thread and never leaves
//! it, so `ScriptContext` is not `Send`.

pub(crate) mod convert;
pub mod quickjs;

#[cfg(test)]
pub(crate) mod testing;


pub use quickjs::{QuickJsContext, QuickJsEngine};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::{BridgeResult, ScriptError};

/// Host-provided primitive callable from scripts.
///
/// Arguments and results cross the boundary as JSON values. An `Err` is
/// thrown into the script as an `Error` carrying the message.
pub type HostFunction = Arc<dyn Fn(&[JsonValue]) -> Result<JsonValue, String> + Send + Sync>;

/// Callback fired once per context, right after creation and before any
/// script runs.
pub type ContextObserver = Arc<dyn Fn(&mut dyn ScriptContext) + Send + Sync>;

/// Default context name shown in diagnostics.
pub const DEFAULT_CONTEXT_NAME: &str = "ScriptBridgeContext";

/// Limits applied by the custom runtime build. Zero keeps the engine default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeLimits {
    /// Heap limit in bytes
    #[serde(default)]
    pub memory_limit: usize,
    /// Native stack limit in bytes
    #[serde(default)]
    pub max_stack_size: usize,
    /// Allocation threshold triggering a GC cycle
    #[serde(default)]
    pub gc_threshold: usize,
}

/// Options for creating one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub name: String,
    pub use_custom_runtime: bool,
    pub limits: RuntimeLimits,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONTEXT_NAME.to_string(),
            use_custom_runtime: false,
            limits: RuntimeLimits::default(),
        }
    }
}

/// A script engine able to create execution contexts.
pub trait Engine: Send + Sync + 'static {
    /// Engine name for diagnostics
    fn name(&self) -> &'static str;

    /// Bytecode format version this engine loads
    fn bytecode_format_version(&self) -> u32;

    /// Create a new context on the calling thread
    fn create_context(
        &self,
        options: &ContextOptions,
    ) -> Result<Box<dyn ScriptContext>, ScriptError>;
}

/// One interpreter instance.
///
/// Every method must be called on the thread that created the context.
pub trait ScriptContext {
    /// Context name
    fn name(&self) -> &str;

    /// Rename the context
    fn set_name(
        &mut self,
        name: &str,
    );

    /// Whether the context runs on the custom runtime build
    fn uses_custom_runtime(&self) -> bool;

    /// Whether any script has been evaluated yet
    fn has_evaluated(&self) -> bool;

    /// Install a host function as a named global.
    ///
    /// Fails with `BridgeError::State` once a script has been evaluated.
    fn install_global(
        &mut self,
        name: &str,
        function: HostFunction,
    ) -> BridgeResult<()>;

    /// Install a JSON value as a named global
    fn set_global_value(
        &mut self,
        name: &str,
        value: &JsonValue,
    ) -> BridgeResult<()>;

    /// Evaluate source text
    fn evaluate(
        &mut self,
        source: &str,
        source_url: &str,
    ) -> Result<JsonValue, ScriptError>;

    /// Evaluate an engine-specific bytecode payload.
    ///
    /// The payload must be one this engine produced with `compile_bytecode`.
    /// Engines may not validate images, so callers check integrity first
    /// (the container loader does).
    fn evaluate_bytecode(
        &mut self,
        payload: &[u8],
        source_url: &str,
    ) -> Result<(), ScriptError>;

    /// Compile source text into an engine-specific bytecode payload
    fn compile_bytecode(
        &mut self,
        source: &str,
        source_url: &str,
    ) -> Result<Vec<u8>, ScriptError>;

    /// Resolve `path` from the global object and call it with `args`.
    ///
    /// The object holding the final segment is passed as `this`. A path that
    /// does not resolve to a function fails with `BridgeError::NotFound`.
    fn call_function(
        &mut self,
        path: &[&str],
        args: &[JsonValue],
    ) -> BridgeResult<JsonValue>;
}

/// Observer list for the "context created" notification.
#[derive(Clone, Default)]
pub struct ContextObservers {
    observers: Vec<ContextObserver>,
}

impl ContextObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn push(
        &mut self,
        observer: ContextObserver,
    ) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Fire every observer in registration order.
    pub fn notify(
        &self,
        context: &mut dyn ScriptContext,
    ) {
        for observer in &self.observers {
            observer(context);
        }
    }
}

impl fmt::Debug for ContextObservers {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ContextObservers")
            .field("count", &self.observers.len())
            .finish()
    }
}
