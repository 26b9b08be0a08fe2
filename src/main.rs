//! scriptbridge CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use scriptbridge::util::config::{load_config_from, load_user_config, BridgeConfig};
use scriptbridge::util::logger;
use scriptbridge::{build_bytecode, dump_bytecode, run_bundle, NAME, VERSION};

/// Run JavaScript bundles on a dedicated executor thread
#[derive(Parser, Debug)]
#[command(name = "scriptbridge")]
#[command(version = VERSION)]
#[command(about = "Embedded JavaScript executor with a bytecode fast path", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a bundle and optionally call one of its functions
    Run {
        /// Source or bytecode bundle
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Function to call after loading, as Module.method
        #[arg(long, value_name = "MODULE.METHOD")]
        call: Option<String>,

        /// JSON array of call arguments
        #[arg(long, value_name = "JSON", default_value = "[]")]
        args: String,

        /// Try the bytecode path first
        #[arg(long)]
        bytecode: bool,

        /// Use the custom runtime build with configured limits
        #[arg(long)]
        custom_runtime: bool,

        /// Configuration file (defaults to the user config)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Precompile a source file into a bytecode bundle
    Compile {
        /// Source file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output bundle
        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,
    },

    /// Show the bytecode header and the load path a bundle would take
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print version information
    Version,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init_cli(args.verbose);

    match execute(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            file,
            call,
            args,
            bytecode,
            custom_runtime,
            config,
        } => {
            let mut settings = load_settings(config)?;
            settings.engine.try_bytecode |= bytecode;
            settings.engine.use_custom_runtime |= custom_runtime;

            let call = call.map(|target| parse_target(&target)).transpose()?;
            let call_args = parse_args(&args)?;

            let (executor, loaded) = run_bundle(&file, settings.executor_config())?;
            eprintln!("{} {} ({})", "loaded".green().bold(), file.display(), loaded);

            if let Some((module, method)) = call {
                let result = executor
                    .call(&module, &method, call_args)?
                    .wait()
                    .with_context(|| format!("Call to {}.{} failed", module, method))?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            executor.teardown();
        }
        Commands::Compile { file, output } => {
            let size = build_bytecode(&file, &output)?;
            eprintln!(
                "{} {} -> {} ({} bytes)",
                "compiled".green().bold(),
                file.display(),
                output.display(),
                size
            );
        }
        Commands::Inspect { file } => {
            let bytes =
                fs::read(&file).with_context(|| format!("Failed to read: {}", file.display()))?;
            println!("{}", dump_bytecode(&bytes));
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

fn load_settings(path: Option<PathBuf>) -> Result<BridgeConfig> {
    let config = match path {
        Some(path) => load_config_from(&path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => load_user_config().context("Failed to load user config")?,
    };
    Ok(config.with_env_overrides())
}

fn parse_target(target: &str) -> Result<(String, String)> {
    match target.rsplit_once('.') {
        Some((module, method)) if !module.is_empty() && !method.is_empty() => {
            Ok((module.to_string(), method.to_string()))
        }
        _ => bail!("--call expects Module.method, got `{}`", target),
    }
}

fn parse_args(raw: &str) -> Result<Vec<JsonValue>> {
    match serde_json::from_str(raw).context("--args is not valid JSON")? {
        JsonValue::Array(values) => Ok(values),
        other => Ok(vec![other]),
    }
}
