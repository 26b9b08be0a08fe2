//! Script executor
//!
//! Owns one execution context on a dedicated thread and serializes all work
//! on it through a FIFO queue:
//!
//! ```text
//!              ┌──────────────────────── Executor ─────────────────────────┐
//! host ──────▶ │ execute_application_script (blocks)    ┌───────────────┐ │
//! host ──────▶ │ call_function_on_module (returns)  ──▶ │ FIFO job queue │ │
//! host ──────▶ │ with_context / execute_async           └───────┬───────┘ │
//!              │                                                 ▼         │
//!              │                          executor thread: ScriptContext   │
//!              └───────────────────────────────────────────────────────────┘
//! ```
//!
//! States: `Ready` after construction, `Executing` while an application
//! script runs, `TornDown` after `teardown`. Teardown is idempotent and
//! lets every job queued before it finish.

pub mod provider;
pub(crate) mod worker;


pub use provider::{ContextProvider, HandoffCell, PreparedContext};

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use crossbeam::channel;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use self::worker::{ContextSetup, Job, WorkerHandle};
use crate::bridge::{CallResult, Handler, InvocationRequest, ModuleRegistry, PendingCall};
use crate::bytecode::{encode_container, LoadedScript, ScriptSource};
use crate::engine::{
    ContextObservers, ContextOptions, Engine, HostFunction, QuickJsEngine, RuntimeLimits,
    ScriptContext, DEFAULT_CONTEXT_NAME,
};
use crate::errors::{BridgeError, BridgeResult, ScriptError};

/// Default name of the executor thread.
pub const DEFAULT_THREAD_NAME: &str = "scriptbridge.js";

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Run on the custom runtime build, which applies `limits`
    pub use_custom_runtime: bool,
    /// Attempt the bytecode path before source
    pub try_bytecode: bool,
    pub context_name: String,
    pub thread_name: String,
    pub limits: RuntimeLimits,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            use_custom_runtime: false,
            try_bytecode: false,
            context_name: DEFAULT_CONTEXT_NAME.to_string(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            limits: RuntimeLimits::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn new(
        use_custom_runtime: bool,
        try_bytecode: bool,
    ) -> Self {
        Self {
            use_custom_runtime,
            try_bytecode,
            ..Self::default()
        }
    }

    pub(crate) fn context_options(&self) -> ContextOptions {
        ContextOptions {
            name: self.context_name.clone(),
            use_custom_runtime: self.use_custom_runtime,
            limits: self.limits,
        }
    }
}

/// Observable executor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Ready,
    Executing,
    TornDown,
}

/// Builder for [`Executor`] and [`ContextProvider`].
pub struct ExecutorBuilder {
    config: ExecutorConfig,
    engine: Arc<dyn Engine>,
    observers: ContextObservers,
    registry: ModuleRegistry,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            engine: Arc::new(QuickJsEngine::new()),
            observers: ContextObservers::new(),
            registry: ModuleRegistry::new(),
        }
    }

    pub fn config(
        mut self,
        config: ExecutorConfig,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn use_custom_runtime(
        mut self,
        enabled: bool,
    ) -> Self {
        self.config.use_custom_runtime = enabled;
        self
    }

    pub fn try_bytecode(
        mut self,
        enabled: bool,
    ) -> Self {
        self.config.try_bytecode = enabled;
        self
    }

    pub fn context_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.config.context_name = name.into();
        self
    }

    pub fn thread_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn limits(
        mut self,
        limits: RuntimeLimits,
    ) -> Self {
        self.config.limits = limits;
        self
    }

    /// Use another engine than QuickJS
    pub fn engine(
        mut self,
        engine: Arc<dyn Engine>,
    ) -> Self {
        self.engine = engine;
        self
    }

    /// Observe context creation. Observers run on the executor thread,
    /// once, before any script.
    pub fn on_context_created<F>(
        mut self,
        observer: F,
    ) -> Self
    where
        F: Fn(&mut dyn ScriptContext) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Pre-register a bridge handler
    pub fn register(
        mut self,
        module: &str,
        method: &str,
        handler: Handler,
    ) -> Self {
        self.registry.register(module, method, handler);
        self
    }

    fn into_setup(self) -> ContextSetup {
        ContextSetup {
            config: self.config,
            engine: self.engine,
            observers: self.observers,
            registry: Arc::new(RwLock::new(self.registry)),
        }
    }

    fn spawn(self) -> BridgeResult<PreparedContext> {
        let setup = self.into_setup();
        let config = setup.config.clone();
        let registry = setup.registry.clone();
        let worker = WorkerHandle::spawn(setup)?;
        Ok(PreparedContext {
            worker,
            config,
            registry,
        })
    }

    /// Create the executor, blocking until its context is ready.
    pub fn build(self) -> BridgeResult<Executor> {
        self.spawn()?.into_executor()
    }

    /// Start creating the context without waiting for it.
    pub fn prewarm(self) -> BridgeResult<ContextProvider> {
        Ok(ContextProvider::from_prepared(self.spawn()?))
    }
}

/// Script executor bound to one execution context.
pub struct Executor {
    worker: Mutex<Option<WorkerHandle>>,
    thread: Thread,
    registry: Arc<RwLock<ModuleRegistry>>,
    context_name: Mutex<String>,
    engine_name: &'static str,
    use_custom_runtime: bool,
    try_bytecode: bool,
    bytecode_format_version: u32,
    executing: AtomicUsize,
    /// Set before the first script or call is queued, under `context_name`
    used: AtomicBool,
    torn_down: AtomicBool,
}

impl Executor {
    /// Create an executor with a fresh context.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use scriptbridge::bytecode::ScriptSource;
    /// use scriptbridge::executor::Executor;
    ///
    /// let executor = Executor::initialize(false, true)?;
    /// executor.execute_application_script(ScriptSource::from_text(
    ///     "function add(a, b) { return a + b; }",
    ///     "app.js",
    /// ))?;
    /// # Ok::<(), scriptbridge::errors::BridgeError>(())
    /// ```
    pub fn initialize(
        use_custom_runtime: bool,
        try_bytecode: bool,
    ) -> BridgeResult<Self> {
        Self::with_config(ExecutorConfig::new(use_custom_runtime, try_bytecode))
    }

    pub fn with_config(config: ExecutorConfig) -> BridgeResult<Self> {
        ExecutorBuilder::new().config(config).build()
    }

    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Take over the context pre-warmed by `provider`.
    pub fn from_provider(provider: &ContextProvider) -> BridgeResult<Self> {
        provider.consume()?.into_executor()
    }

    pub(crate) fn from_prepared(prepared: PreparedContext) -> BridgeResult<Self> {
        let PreparedContext {
            mut worker,
            config,
            registry,
        } = prepared;
        let info = worker.wait_ready()?;
        let thread = worker.thread().clone();

        info!(
            context = %info.name,
            engine = info.engine,
            try_bytecode = config.try_bytecode,
            "executor ready"
        );
        Ok(Self {
            worker: Mutex::new(Some(worker)),
            thread,
            registry,
            context_name: Mutex::new(info.name),
            engine_name: info.engine,
            use_custom_runtime: info.use_custom_runtime,
            try_bytecode: config.try_bytecode,
            bytecode_format_version: info.bytecode_format_version,
            executing: AtomicUsize::new(0),
            used: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        })
    }

    /// Load and run an application script, blocking until it finishes.
    ///
    /// With `try_bytecode` the buffer is tried as a bytecode container first;
    /// anything unusable falls back to source text.
    pub fn execute_application_script(
        &self,
        source: ScriptSource,
    ) -> BridgeResult<LoadedScript> {
        self.ensure_off_worker("execute_application_script")?;
        let url = source.url().to_string();
        let (reply, outcome) = channel::bounded(1);

        self.mark_used();
        self.executing.fetch_add(1, Ordering::AcqRel);
        let result = self.submit(Job::Execute { source, reply }).and_then(|()| {
            outcome.recv().map_err(|_| {
                BridgeError::state("executor thread stopped while the script was running")
            })
        });
        self.executing.fetch_sub(1, Ordering::AcqRel);

        let loaded = result??;
        info!(url = %url, %loaded, "application script executed");
        Ok(loaded)
    }

    /// Queue a call to `module.method`; `callback` receives the result on
    /// the executor thread.
    pub fn call_function_on_module<F>(
        &self,
        module: &str,
        method: &str,
        args: Vec<JsonValue>,
        callback: F,
    ) -> BridgeResult<()>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        self.mark_used();
        debug!(module, method, args = args.len(), "queueing call");
        self.submit(Job::Invoke(InvocationRequest::new(
            module, method, args, callback,
        )))
    }

    /// Queue a call and get a handle to wait on.
    pub fn call(
        &self,
        module: &str,
        method: &str,
        args: Vec<JsonValue>,
    ) -> BridgeResult<PendingCall> {
        let (complete, pending) = PendingCall::channel(self.thread.id());
        self.call_function_on_module(module, method, args, complete)?;
        Ok(pending)
    }

    /// Queue a call and await its result.
    pub fn call_async(
        &self,
        module: &str,
        method: &str,
        args: Vec<JsonValue>,
    ) -> impl Future<Output = CallResult> + Send + 'static {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        let submitted = self.call_function_on_module(module, method, args, move |result| {
            let _ = sender.send(result);
        });
        async move {
            submitted?;
            receiver.await.unwrap_or_else(|_| {
                Err(BridgeError::state(
                    "executor stopped before the call completed",
                ))
            })
        }
    }

    /// Run `f` against the context and wait for its result.
    pub fn with_context<R, F>(
        &self,
        f: F,
    ) -> BridgeResult<R>
    where
        F: FnOnce(&mut dyn ScriptContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_off_worker("with_context")?;
        let (reply, outcome) = channel::bounded(1);
        self.submit(Job::Run(Box::new(move |context: &mut dyn ScriptContext| {
            let _ = reply.send(f(context));
        })))?;
        outcome
            .recv()
            .map_err(|_| BridgeError::state("context task did not complete"))
    }

    /// Queue `f` against the context without waiting.
    pub fn execute_async<F>(
        &self,
        f: F,
    ) -> BridgeResult<()>
    where
        F: FnOnce(&mut dyn ScriptContext) + Send + 'static,
    {
        self.submit(Job::Run(Box::new(f)))
    }

    /// Publish a JSON value as a global.
    pub fn inject_json_global(
        &self,
        name: &str,
        value: JsonValue,
    ) -> BridgeResult<()> {
        let name = name.to_string();
        self.with_context(move |context| context.set_global_value(&name, &value))?
    }

    /// Install a host function as a global; only before the first script.
    pub fn install_global(
        &self,
        name: &str,
        function: HostFunction,
    ) -> BridgeResult<()> {
        let name = name.to_string();
        self.with_context(move |context| context.install_global(&name, function))?
    }

    /// Compile `source` into a bytecode container this engine can load.
    pub fn compile_bytecode(
        &self,
        source: &str,
        source_url: &str,
    ) -> BridgeResult<Vec<u8>> {
        let (source, url) = (source.to_string(), source_url.to_string());
        let payload = self.with_context(move |context| context.compile_bytecode(&source, &url))??;
        encode_container(self.bytecode_format_version, &payload)
            .map_err(|e| BridgeError::Script(ScriptError::new(e.to_string())))
    }

    /// Bind or replace a bridge handler. Takes effect for calls dispatched
    /// after it returns.
    pub fn register_handler(
        &self,
        module: &str,
        method: &str,
        handler: Handler,
    ) -> Option<Handler> {
        self.registry.write().register(module, method, handler)
    }

    pub fn unregister_handler(
        &self,
        module: &str,
        method: &str,
    ) -> Option<Handler> {
        self.registry.write().unregister(module, method)
    }

    /// Route `module.method` to the global function at `path`.
    pub fn bind_global(
        &self,
        module: &str,
        method: &str,
        path: &str,
    ) -> Option<Handler> {
        self.register_handler(module, method, Handler::script(path))
    }

    /// Snapshot of the bridge registry
    pub fn registry(&self) -> ModuleRegistry {
        self.registry.read().clone()
    }

    /// Rename the context; only before the first script or call.
    pub fn set_context_name(
        &self,
        name: &str,
    ) -> BridgeResult<()> {
        // Held until the rename is queued, so no first use can slip in ahead.
        let mut current = self.context_name.lock();
        if self.used.load(Ordering::Acquire) {
            return Err(BridgeError::state(
                "context name cannot change after the context was used",
            ));
        }
        let renamed = name.to_string();
        self.execute_async(move |context| context.set_name(&renamed))?;
        *current = name.to_string();
        Ok(())
    }

    /// Close the rename window. Waits out a rename that is being queued.
    fn mark_used(&self) {
        if !self.used.load(Ordering::Acquire) {
            let _name = self.context_name.lock();
            self.used.store(true, Ordering::Release);
        }
    }

    pub fn context_name(&self) -> String {
        self.context_name.lock().clone()
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine_name
    }

    pub fn use_custom_runtime(&self) -> bool {
        self.use_custom_runtime
    }

    pub fn try_bytecode(&self) -> bool {
        self.try_bytecode
    }

    pub fn bytecode_format_version(&self) -> u32 {
        self.bytecode_format_version
    }

    /// The executor thread
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn state(&self) -> ExecutorState {
        if self.torn_down.load(Ordering::Acquire) {
            ExecutorState::TornDown
        } else if self.executing.load(Ordering::Acquire) > 0 {
            ExecutorState::Executing
        } else {
            ExecutorState::Ready
        }
    }

    /// Whether the executor still accepts work
    pub fn is_valid(&self) -> bool {
        !self.torn_down.load(Ordering::Acquire)
            && self
                .worker
                .lock()
                .as_ref()
                .map(WorkerHandle::is_running)
                .unwrap_or(false)
    }

    /// Stop the executor. Queued work finishes first; later calls fail with
    /// `BridgeError::State`. Calling it again does nothing.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.stop();
        }
        info!(context = %self.context_name(), "executor torn down");
    }

    fn submit(
        &self,
        job: Job,
    ) -> BridgeResult<()> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(BridgeError::state("executor has been torn down"));
        }
        match self.worker.lock().as_ref() {
            Some(worker) => worker.send(job),
            None => Err(BridgeError::state("executor has been torn down")),
        }
    }

    fn ensure_off_worker(
        &self,
        operation: &str,
    ) -> BridgeResult<()> {
        if thread::current().id() == self.thread.id() {
            return Err(BridgeError::state(format!(
                "{} would block the executor thread on itself",
                operation
            )));
        }
        Ok(())
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("context_name", &self.context_name())
            .field("engine", &self.engine_name)
            .field("use_custom_runtime", &self.use_custom_runtime)
            .field("try_bytecode", &self.try_bytecode)
            .field("state", &self.state())
            .finish()
    }
}
