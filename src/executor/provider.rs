//! Pre-warmed context provider
//!
//! A provider starts building an execution context on its own thread the
//! moment it is created, so the first script does not pay for context
//! startup. The prepared context can be consumed exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::Thread;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::worker::WorkerHandle;
use super::{Executor, ExecutorBuilder, ExecutorConfig};
use crate::bridge::ModuleRegistry;
use crate::errors::{BridgeError, BridgeResult};

/// Single-use hand-off slot.
///
/// The first `take` wins; every later one gets `None`, even when the first
/// caller dropped what it took.
pub struct HandoffCell<T> {
    consumed: AtomicBool,
    value: Mutex<Option<T>>,
}

impl<T> HandoffCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            consumed: AtomicBool::new(false),
            value: Mutex::new(Some(value)),
        }
    }

    pub fn take(&self) -> Option<T> {
        if self.consumed.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.value.lock().take()
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }
}

/// A context that is being (or has been) created on its executor thread.
pub struct PreparedContext {
    pub(crate) worker: WorkerHandle,
    pub(crate) config: ExecutorConfig,
    pub(crate) registry: Arc<RwLock<ModuleRegistry>>,
}

impl PreparedContext {
    /// The thread the context lives on
    pub fn thread(&self) -> &Thread {
        self.worker.thread()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Wrap into an executor, waiting for context creation to finish.
    pub fn into_executor(self) -> BridgeResult<Executor> {
        Executor::from_prepared(self)
    }
}

/// Pre-warms one execution context for later hand-off.
pub struct ContextProvider {
    use_custom_runtime: bool,
    try_bytecode: bool,
    cell: HandoffCell<PreparedContext>,
}

impl ContextProvider {
    /// Start creating a context with the default engine right away.
    pub fn new(
        use_custom_runtime: bool,
        try_bytecode: bool,
    ) -> BridgeResult<Self> {
        ExecutorBuilder::new()
            .use_custom_runtime(use_custom_runtime)
            .try_bytecode(try_bytecode)
            .prewarm()
    }

    pub(crate) fn from_prepared(prepared: PreparedContext) -> Self {
        debug!(thread = ?prepared.thread().name(), "context pre-warm started");
        Self {
            use_custom_runtime: prepared.config.use_custom_runtime,
            try_bytecode: prepared.config.try_bytecode,
            cell: HandoffCell::new(prepared),
        }
    }

    pub fn use_custom_runtime(&self) -> bool {
        self.use_custom_runtime
    }

    pub fn try_bytecode(&self) -> bool {
        self.try_bytecode
    }

    pub fn is_consumed(&self) -> bool {
        self.cell.is_consumed()
    }

    /// Hand over the prepared context.
    ///
    /// A second call fails with `BridgeError::AlreadyConsumed`.
    pub fn consume(&self) -> BridgeResult<PreparedContext> {
        self.cell.take().ok_or_else(BridgeError::already_consumed)
    }
}

impl std::fmt::Debug for ContextProvider {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ContextProvider")
            .field("use_custom_runtime", &self.use_custom_runtime)
            .field("try_bytecode", &self.try_bytecode)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
