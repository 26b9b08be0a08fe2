//! scriptbridge
//!
//! Hosts an embedded JavaScript engine behind a dedicated executor thread.
//! Application bundles are loaded as source or precompiled bytecode, and
//! named `module.method` functions are invoked asynchronously from any host
//! thread.
//!
//! # Example
//!
//! ```no_run
//! use scriptbridge::bytecode::ScriptSource;
//! use scriptbridge::executor::Executor;
//! use serde_json::json;
//!
//! let executor = Executor::initialize(false, true)?;
//! executor.execute_application_script(ScriptSource::from_text(
//!     "function add(a, b) { return a + b; }",
//!     "app.js",
//! ))?;
//! executor.bind_global("Math", "add", "add");
//! let sum = executor.call("Math", "add", vec![json!(2), json!(3)])?.wait()?;
//! assert_eq!(sum, json!(5));
//! # Ok::<(), scriptbridge::errors::BridgeError>(())
//! ```

#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod bytecode;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod util;

pub use anyhow::{Context, Result};

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::bytecode::{BytecodeHeader, BytecodeLoader, HeaderRead, LoadPlan, LoadedScript, ScriptSource};
use crate::engine::quickjs::QUICKJS_BYTECODE_VERSION;
use crate::executor::{Executor, ExecutorConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "scriptbridge";

/// Start an executor and load the bundle at `path` into it.
pub fn run_bundle(
    path: &Path,
    config: ExecutorConfig,
) -> Result<(Executor, LoadedScript)> {
    let source = ScriptSource::from_file(path)
        .with_context(|| format!("Failed to read bundle: {}", path.display()))?;
    let executor = Executor::with_config(config).context("Failed to start executor")?;
    let loaded = executor
        .execute_application_script(source)
        .with_context(|| format!("Failed to load bundle: {}", path.display()))?;
    debug!(path = %path.display(), %loaded, "bundle loaded");
    Ok((executor, loaded))
}

/// Precompile the source file at `input` into a bytecode container at
/// `output`. Returns the container size.
pub fn build_bytecode(
    input: &Path,
    output: &Path,
) -> Result<usize> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("Failed to read source: {}", input.display()))?;
    let executor = Executor::initialize(false, false).context("Failed to start executor")?;
    let url = format!("file://{}", input.display());
    let bundle = executor
        .compile_bytecode(&source, &url)
        .with_context(|| format!("Failed to compile: {}", input.display()))?;
    fs::write(output, &bundle)
        .with_context(|| format!("Failed to write bytecode: {}", output.display()))?;
    Ok(bundle.len())
}

/// Describe how the loader would treat `bytes` with bytecode enabled.
pub fn dump_bytecode(bytes: &[u8]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "size:            {} bytes", bytes.len());

    match BytecodeHeader::read(bytes) {
        HeaderRead::Absent => {
            let _ = writeln!(out, "header:          none");
        }
        HeaderRead::Truncated => {
            let _ = writeln!(out, "header:          truncated");
        }
        HeaderRead::Present(header) => {
            let _ = writeln!(out, "magic:           {:#010x}", header.magic);
            let _ = writeln!(out, "format version:  {:#010x}", header.version);
            let _ = writeln!(out, "flags:           {:#010x}", header.flags);
            let _ = writeln!(out, "payload length:  {}", header.payload_len);
            let digest: String = header.digest.iter().map(|b| format!("{:02x}", b)).collect();
            let _ = writeln!(out, "payload sha256:  {}", digest);
        }
    }

    let loader = BytecodeLoader::new(QUICKJS_BYTECODE_VERSION, true);
    let decision = match loader.plan(bytes) {
        LoadPlan::Bytecode { .. } => "bytecode".to_string(),
        LoadPlan::Source(reason) => format!("source ({})", reason),
    };
    let _ = writeln!(out, "engine version:  {:#010x}", QUICKJS_BYTECODE_VERSION);
    let _ = write!(out, "load path:       {}", decision);
    out
}
