//! Dedicated executor thread
//!
//! One thread per context. The thread creates the context, fires the
//! "context created" observers, reports readiness, then serves a FIFO job
//! queue until it reads `Shutdown`. Jobs queued before `Shutdown` still run.
//! A job that panics is answered with an error and the loop carries on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::ExecutorConfig;
use crate::bridge::{InvocationRequest, ModuleRegistry};
use crate::bytecode::{BytecodeLoader, LoadedScript, ScriptSource};
use crate::engine::{ContextObservers, Engine, ScriptContext};
use crate::errors::{BridgeError, BridgeResult, ScriptError};

/// Closure run against the context on its thread.
pub(crate) type ContextTask = Box<dyn FnOnce(&mut dyn ScriptContext) + Send + 'static>;

/// Work item for the executor thread.
pub(crate) enum Job {
    /// Load an application script and report back
    Execute {
        source: ScriptSource,
        reply: Sender<Result<LoadedScript, ScriptError>>,
    },
    /// Bridge call
    Invoke(InvocationRequest),
    /// Arbitrary context access
    Run(ContextTask),
    /// Stop after everything queued before it
    Shutdown,
}

/// What the thread reports once its context exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContextInfo {
    pub name: String,
    pub engine: &'static str,
    pub use_custom_runtime: bool,
    pub bytecode_format_version: u32,
}

/// Everything needed to bring up a context on a fresh thread.
#[derive(Clone)]
pub(crate) struct ContextSetup {
    pub config: ExecutorConfig,
    pub engine: Arc<dyn Engine>,
    pub observers: ContextObservers,
    pub registry: Arc<RwLock<ModuleRegistry>>,
}

/// Owner side of an executor thread.
pub(crate) struct WorkerHandle {
    jobs: Sender<Job>,
    thread: Option<JoinHandle<()>>,
    thread_handle: Thread,
    ready: Option<Receiver<Result<ContextInfo, ScriptError>>>,
    info: Option<ContextInfo>,
}

impl WorkerHandle {
    /// Start the thread; context creation begins immediately on it.
    pub(crate) fn spawn(setup: ContextSetup) -> BridgeResult<Self> {
        let (jobs, inbox) = channel::unbounded();
        let (ready_tx, ready) = channel::bounded(1);
        let thread_name = setup.config.thread_name.clone();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker_loop(setup, inbox, ready_tx))
            .map_err(|e| {
                BridgeError::state(format!(
                    "failed to spawn executor thread `{}`: {}",
                    thread_name, e
                ))
            })?;

        debug!(thread = %thread_name, "executor thread spawned");
        Ok(Self {
            jobs,
            thread_handle: handle.thread().clone(),
            thread: Some(handle),
            ready: Some(ready),
            info: None,
        })
    }

    pub(crate) fn thread(&self) -> &Thread {
        &self.thread_handle
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_handle.id()
    }

    /// Block until the context exists or its creation failed.
    pub(crate) fn wait_ready(&mut self) -> BridgeResult<ContextInfo> {
        if let Some(info) = &self.info {
            return Ok(info.clone());
        }
        let ready = self
            .ready
            .take()
            .ok_or_else(|| BridgeError::state("execution context creation already failed"))?;
        match ready.recv() {
            Ok(Ok(info)) => {
                self.info = Some(info.clone());
                Ok(info)
            }
            Ok(Err(err)) => Err(BridgeError::Script(err)),
            Err(_) => Err(BridgeError::state(
                "executor thread exited before creating its context",
            )),
        }
    }

    pub(crate) fn send(
        &self,
        job: Job,
    ) -> BridgeResult<()> {
        self.jobs
            .send(job)
            .map_err(|_| BridgeError::state("executor thread is no longer running"))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Queue a shutdown behind pending work and wait for the thread.
    ///
    /// From the executor thread itself the thread is detached instead; it
    /// exits once the current job returns and the queue drains.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        let _ = self.jobs.send(Job::Shutdown);

        if thread::current().id() == self.thread_id() {
            debug!("executor thread stopping itself, detaching");
            return;
        }
        if handle.join().is_err() {
            error!("executor thread panicked");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    setup: ContextSetup,
    inbox: Receiver<Job>,
    ready: Sender<Result<ContextInfo, ScriptError>>,
) {
    let ContextSetup {
        config,
        engine,
        observers,
        registry,
    } = setup;

    let mut context = match engine.create_context(&config.context_options()) {
        Ok(context) => context,
        Err(err) => {
            error!(engine = engine.name(), error = %err, "failed to create execution context");
            let _ = ready.send(Err(err));
            return;
        }
    };

    observers.notify(context.as_mut());

    let info = ContextInfo {
        name: context.name().to_string(),
        engine: engine.name(),
        use_custom_runtime: context.uses_custom_runtime(),
        bytecode_format_version: engine.bytecode_format_version(),
    };
    info!(
        context = %info.name,
        engine = info.engine,
        custom_runtime = info.use_custom_runtime,
        "execution context created"
    );
    let _ = ready.send(Ok(info));

    let loader = BytecodeLoader::new(engine.bytecode_format_version(), config.try_bytecode);

    while let Ok(job) = inbox.recv() {
        match job {
            Job::Execute { source, reply } => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    loader.load(context.as_mut(), &source)
                }))
                .unwrap_or_else(|payload| {
                    let what = format!("loading {}", source.url());
                    Err(ScriptError::from_panic(&what, payload.as_ref()).with_source_url(source.url()))
                });
                match &result {
                    Ok(loaded) => debug!(url = source.url(), %loaded, "script loaded"),
                    Err(err) => warn!(url = source.url(), error = %err, "script failed"),
                }
                let _ = reply.send(result);
            }
            Job::Invoke(request) => {
                let handler = registry
                    .read()
                    .resolve(request.module(), request.method())
                    .cloned();
                request.dispatch(context.as_mut(), handler);
            }
            Job::Run(task) => {
                if panic::catch_unwind(AssertUnwindSafe(|| task(context.as_mut()))).is_err() {
                    error!(context = %context.name(), "context task panicked");
                }
            }
            Job::Shutdown => break,
        }
    }

    debug!(context = %context.name(), "executor thread exiting");
}
