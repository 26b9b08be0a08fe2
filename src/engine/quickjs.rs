//! QuickJS backend
//!
//! Source text is evaluated as a global script. Bytecode payloads are QuickJS
//! module images: a bundle loaded from bytecode runs as a module, so anything it
//! wants to expose to the call bridge has to be published on `globalThis`.

use std::panic::{self, AssertUnwindSafe};

use once_cell::sync::Lazy;
use regex::Regex;
use rquickjs::function::{Rest, This};
use rquickjs::{Coerced, Context, Ctx, Exception, FromJs, Function, Module, Runtime, Value};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::convert::{js_to_json, json_to_js};
use super::{ContextOptions, Engine, HostFunction, ScriptContext};
use crate::errors::{BridgeError, BridgeResult, ScriptError};

/// Bytecode format version of the bundled QuickJS build.
///
/// Bumped whenever the `rquickjs` upgrade changes the module image layout.
pub const QUICKJS_BYTECODE_VERSION: u32 = 0x0009_0005;

/// Upper bound on promise jobs drained after one evaluation.
const MAX_PENDING_JOBS: usize = 10_000;

/// `at fn (file:line:column)` or `at file:line`
static STACK_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"at .*?:(\d+)(?::(\d+))?\)?\s*$").expect("valid stack regex"));

/// QuickJS engine factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickJsEngine;

impl QuickJsEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for QuickJsEngine {
    fn name(&self) -> &'static str {
        "quickjs"
    }

    fn bytecode_format_version(&self) -> u32 {
        QUICKJS_BYTECODE_VERSION
    }

    fn create_context(
        &self,
        options: &ContextOptions,
    ) -> Result<Box<dyn ScriptContext>, ScriptError> {
        Ok(Box::new(QuickJsContext::new(options)?))
    }
}

/// One QuickJS runtime + context pair.
pub struct QuickJsContext {
    context: Context,
    runtime: Runtime,
    name: String,
    use_custom_runtime: bool,
    evaluated: bool,
}

impl QuickJsContext {
    pub fn new(options: &ContextOptions) -> Result<Self, ScriptError> {
        let runtime = Runtime::new()
            .map_err(|e| ScriptError::new(format!("Failed to create QuickJS runtime: {e}")))?;

        if options.use_custom_runtime {
            let limits = options.limits;
            if limits.memory_limit > 0 {
                runtime.set_memory_limit(limits.memory_limit);
            }
            if limits.max_stack_size > 0 {
                runtime.set_max_stack_size(limits.max_stack_size);
            }
            if limits.gc_threshold > 0 {
                runtime.set_gc_threshold(limits.gc_threshold);
            }
            debug!(
                memory_limit = limits.memory_limit,
                max_stack_size = limits.max_stack_size,
                gc_threshold = limits.gc_threshold,
                "custom QuickJS runtime configured"
            );
        }

        let context = Context::full(&runtime)
            .map_err(|e| ScriptError::new(format!("Failed to create QuickJS context: {e}")))?;

        Ok(Self {
            context,
            runtime,
            name: options.name.clone(),
            use_custom_runtime: options.use_custom_runtime,
            evaluated: false,
        })
    }

    /// Run queued promise jobs until the queue is empty.
    fn drain_jobs(&self) {
        let mut executed = 0;
        while self.runtime.is_job_pending() {
            if executed == MAX_PENDING_JOBS {
                warn!(context = %self.name, "pending job limit reached, leaving jobs queued");
                break;
            }
            if self.runtime.execute_pending_job().is_err() {
                warn!(context = %self.name, "promise job threw");
            }
            executed += 1;
        }
    }
}

impl ScriptContext for QuickJsContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(
        &mut self,
        name: &str,
    ) {
        self.name = name.to_string();
    }

    fn uses_custom_runtime(&self) -> bool {
        self.use_custom_runtime
    }

    fn has_evaluated(&self) -> bool {
        self.evaluated
    }

    fn install_global(
        &mut self,
        name: &str,
        function: HostFunction,
    ) -> BridgeResult<()> {
        if self.evaluated {
            return Err(BridgeError::state(format!(
                "cannot install global `{}` after the first evaluation",
                name
            )));
        }

        self.context
            .with(|ctx| {
                let callable = host_function(&ctx, name, function)?;
                ctx.globals().set(name, callable)
            })
            .map_err(|e| {
                BridgeError::Script(ScriptError::new(format!(
                    "Failed to install global `{}`: {}",
                    name, e
                )))
            })
    }

    fn set_global_value(
        &mut self,
        name: &str,
        value: &JsonValue,
    ) -> BridgeResult<()> {
        self.context
            .with(|ctx| {
                let value = json_to_js(&ctx, value)?;
                ctx.globals().set(name, value)
            })
            .map_err(|e| {
                BridgeError::Script(ScriptError::new(format!(
                    "Failed to set global `{}`: {}",
                    name, e
                )))
            })
    }

    fn evaluate(
        &mut self,
        source: &str,
        source_url: &str,
    ) -> Result<JsonValue, ScriptError> {
        self.evaluated = true;
        let result = self.context.with(|ctx| match ctx.eval::<Value<'_>, _>(source) {
            Ok(value) => js_to_json(&value).map_err(|e| {
                ScriptError::new(format!("Failed to convert script result: {e}"))
                    .with_source_url(source_url)
            }),
            Err(err) => Err(script_error(&ctx, err, source_url)),
        });
        self.drain_jobs();
        result
    }

    fn evaluate_bytecode(
        &mut self,
        payload: &[u8],
        source_url: &str,
    ) -> Result<(), ScriptError> {
        self.evaluated = true;
        let result = self.context.with(|ctx| {
            // SAFETY: QuickJS does not validate module images, so the payload
            // must be one `compile_bytecode` produced for this build. The
            // container loader only gets here after the header version matched
            // and the payload's SHA-256 equalled the recorded digest.
            let module = unsafe { Module::load(ctx.clone(), payload) }
                .map_err(|err| script_error(&ctx, err, source_url))?;
            let (_module, promise) = module
                .eval()
                .map_err(|err| script_error(&ctx, err, source_url))?;
            promise
                .finish::<()>()
                .map_err(|err| script_error(&ctx, err, source_url))
        });
        self.drain_jobs();
        result
    }

    fn compile_bytecode(
        &mut self,
        source: &str,
        source_url: &str,
    ) -> Result<Vec<u8>, ScriptError> {
        self.context.with(|ctx| {
            let module = Module::declare(ctx.clone(), source_url, source)
                .map_err(|err| script_error(&ctx, err, source_url))?;
            module
                .write_le()
                .map_err(|err| script_error(&ctx, err, source_url))
        })
    }

    fn call_function(
        &mut self,
        path: &[&str],
        args: &[JsonValue],
    ) -> BridgeResult<JsonValue> {
        let name = self.name.as_str();
        let result = self.context.with(|ctx| {
            let (receiver, function) = resolve_path(&ctx, path)?;

            let mut js_args = Vec::with_capacity(args.len());
            for arg in args {
                let value = json_to_js(&ctx, arg).map_err(|e| {
                    BridgeError::Script(ScriptError::new(format!(
                        "Failed to convert argument: {e}"
                    )))
                })?;
                js_args.push(value);
            }

            match function.call::<_, Value<'_>>((This(receiver), Rest(js_args))) {
                Ok(value) => js_to_json(&value).map_err(|e| {
                    BridgeError::Script(ScriptError::new(format!(
                        "Failed to convert call result: {e}"
                    )))
                }),
                Err(err) => Err(BridgeError::Script(script_error(&ctx, err, name))),
            }
        });
        self.drain_jobs();
        result
    }
}

/// Wrap a host function as a JS function.
///
/// Arguments and the result cross as JSON. An `Err` is thrown as a JS
/// `Error`, and so is a panic, which must not unwind through the engine.
fn host_function<'js>(
    ctx: &Ctx<'js>,
    name: &str,
    function: HostFunction,
) -> rquickjs::Result<Function<'js>> {
    let name = name.to_string();
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let mut host_args = Vec::with_capacity(args.0.len());
            for arg in args.0.iter() {
                host_args.push(js_to_json(arg)?);
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| function(&host_args)));
            match outcome {
                Ok(Ok(result)) => json_to_js(&ctx, &result),
                Ok(Err(message)) => Err(Exception::throw_message(&ctx, &message)),
                Err(payload) => {
                    let what = format!("host function `{}`", name);
                    let error = ScriptError::from_panic(&what, payload.as_ref());
                    Err(Exception::throw_message(&ctx, &error.message))
                }
            }
        },
    )
}

/// Walk `path` from the global object to a function and its holder.
fn resolve_path<'js>(
    ctx: &Ctx<'js>,
    path: &[&str],
) -> BridgeResult<(Value<'js>, Function<'js>)> {
    let not_found = || match path.split_last() {
        Some((method, module)) => BridgeError::not_found(module.join("."), *method),
        None => BridgeError::not_found("", ""),
    };

    let (last, parents) = path.split_last().ok_or_else(not_found)?;
    let mut receiver: Value<'js> = ctx.globals().into_value();
    for segment in parents {
        let object = receiver.as_object().ok_or_else(not_found)?;
        let next: Value<'js> = object.get(*segment).map_err(|_| not_found())?;
        if next.is_undefined() || next.is_null() {
            return Err(not_found());
        }
        receiver = next;
    }

    let object = receiver.as_object().ok_or_else(not_found)?;
    let target: Value<'js> = object.get(*last).map_err(|_| not_found())?;
    let function = target.into_function().ok_or_else(not_found)?;
    Ok((receiver, function))
}

/// Turn an engine error into a `ScriptError`, draining the pending exception.
fn script_error<'js>(
    ctx: &Ctx<'js>,
    err: rquickjs::Error,
    source_url: &str,
) -> ScriptError {
    if !matches!(err, rquickjs::Error::Exception) {
        return ScriptError::new(err.to_string()).with_source_url(source_url);
    }
    describe_exception(ctx, ctx.catch(), source_url)
}

fn describe_exception<'js>(
    ctx: &Ctx<'js>,
    caught: Value<'js>,
    source_url: &str,
) -> ScriptError {
    if let Some(object) = caught.as_object() {
        if let Some(exception) = Exception::from_object(object.clone()) {
            let message = exception
                .message()
                .unwrap_or_else(|| "uncaught exception".to_string());
            let message = match object.get::<_, Option<String>>("name").ok().flatten() {
                Some(name) if !name.is_empty() && !message.starts_with(&name) => {
                    format!("{}: {}", name, message)
                }
                _ => message,
            };
            let stack = exception.stack();

            let mut line = object.get::<_, Option<u32>>("lineNumber").ok().flatten();
            let mut column = object.get::<_, Option<u32>>("columnNumber").ok().flatten();
            if line.is_none() {
                if let Some((l, c)) = stack.as_deref().and_then(parse_stack_location) {
                    line = Some(l);
                    column = c;
                }
            }

            return ScriptError::new(message)
                .with_source_url(source_url)
                .with_location(line, column)
                .with_stack(stack);
        }
    }

    let message = match Coerced::<String>::from_js(ctx, caught) {
        Ok(value) => format!("Uncaught {}", value.0),
        Err(err) => format!("Uncaught exception (failed to stringify: {err})"),
    };
    ScriptError::new(message).with_source_url(source_url)
}

/// First `file:line[:column]` frame of a QuickJS stack trace.
pub(crate) fn parse_stack_location(stack: &str) -> Option<(u32, Option<u32>)> {
    stack.lines().find_map(|frame| {
        let captures = STACK_LOCATION.captures(frame.trim_end())?;
        let line = captures.get(1)?.as_str().parse().ok()?;
        let column = captures.get(2).and_then(|c| c.as_str().parse().ok());
        Some((line, column))
    })
}
