//! Call bridge
//!
//! Marshals `(module, method, args)` into an execution context and the result
//! or error back out to the host.
//!
//! ```text
//! host thread                     executor thread
//! -----------                     ---------------
//! call_function_on_module ──────▶ InvocationRequest (FIFO)
//!   returns immediately             registry lookup
//!                                   context.call_function(path, args)
//!                                   callback(CallResult)
//! ```
//!
//! Callbacks always run on the executor thread. A panic in a native handler
//! becomes a `BridgeError::Script` for that call, and a panicking callback is
//! contained and logged. Either way the executor keeps serving its queue.

pub mod registry;


pub use registry::{Handler, ModuleRegistry};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use serde_json::Value as JsonValue;
use tracing::{error, trace};

use crate::engine::ScriptContext;
use crate::errors::{BridgeError, ScriptError};

/// Result of one bridge call: exactly one of value or error.
pub type CallResult = Result<JsonValue, BridgeError>;

/// Completion callback of a bridge call.
pub type CallCallback = Box<dyn FnOnce(CallResult) + Send + 'static>;

/// One pending module/method invocation.
pub struct InvocationRequest {
    module: String,
    method: String,
    args: Vec<JsonValue>,
    callback: CallCallback,
}

impl InvocationRequest {
    pub fn new<F>(
        module: impl Into<String>,
        method: impl Into<String>,
        args: Vec<JsonValue>,
        callback: F,
    ) -> Self
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        Self {
            module: module.into(),
            method: method.into(),
            args,
            callback: Box::new(callback),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[JsonValue] {
        &self.args
    }

    /// Invoke against `context` and hand the result to the callback.
    pub fn dispatch(
        self,
        context: &mut dyn ScriptContext,
        handler: Option<Handler>,
    ) {
        trace!(module = %self.module, method = %self.method, "dispatching call");
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            invoke(context, &self.module, &self.method, &self.args, handler)
        }))
        .unwrap_or_else(|payload| {
            let what = format!("handler for {}.{}", self.module, self.method);
            Err(BridgeError::Script(ScriptError::from_panic(&what, payload.as_ref())))
        });
        deliver(&self.module, &self.method, self.callback, result);
    }
}

impl fmt::Debug for InvocationRequest {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("module", &self.module)
            .field("method", &self.method)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Resolve and call `module.method`.
///
/// Resolution misses are reported against the requested pair, whatever path
/// the handler pointed to.
pub fn invoke(
    context: &mut dyn ScriptContext,
    module: &str,
    method: &str,
    args: &[JsonValue],
    handler: Option<Handler>,
) -> CallResult {
    let result = match handler {
        Some(Handler::Native(function)) => {
            function(args).map_err(|message| BridgeError::Script(ScriptError::new(message)))
        }
        Some(Handler::Script(path)) => {
            let segments: Vec<&str> = path.iter().map(String::as_str).collect();
            context.call_function(&segments, args)
        }
        None => context.call_function(&[module, method], args),
    };

    result.map_err(|err| match err {
        BridgeError::NotFound { .. } => BridgeError::not_found(module, method),
        other => other,
    })
}

fn deliver(
    module: &str,
    method: &str,
    callback: CallCallback,
    result: CallResult,
) {
    if panic::catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
        error!("callback for {}.{} panicked", module, method);
    }
}

/// Handle to a call result that can be waited on.
#[derive(Debug)]
pub struct PendingCall {
    receiver: Receiver<CallResult>,
    worker: ThreadId,
}

impl PendingCall {
    /// Create a completion callback and the handle it completes.
    pub(crate) fn channel(worker: ThreadId) -> (impl FnOnce(CallResult) + Send + 'static, Self) {
        let (sender, receiver) = channel::bounded(1);
        let complete = move |result: CallResult| {
            let _ = sender.send(result);
        };
        (complete, Self { receiver, worker })
    }

    /// Block until the call completes.
    ///
    /// Waiting from the executor thread itself would never finish and fails
    /// with `BridgeError::State`.
    pub fn wait(self) -> CallResult {
        if thread::current().id() == self.worker {
            return Err(BridgeError::state(
                "cannot wait for a bridge call on the executor thread",
            ));
        }
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(stopped_before_completion()))
    }

    /// Block for at most `timeout`; `None` if the call is still running.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<CallResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(stopped_before_completion())),
        }
    }

    /// Result if already available.
    pub fn try_result(&self) -> Option<CallResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(stopped_before_completion())),
        }
    }
}

fn stopped_before_completion() -> BridgeError {
    BridgeError::state("executor stopped before the call completed")
}
