//! scriptbridge configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (SCRIPTBRIDGE_*)
//! 3. Config file (--config PATH, or ~/.config/scriptbridge/config.toml)
//! 4. Default values
//! ```
//!
//! # File format
//!
//! ```toml
//! [engine]
//! use_custom_runtime = true
//! try_bytecode = true
//! context_name = "Checkout"
//! thread_name = "checkout.js"
//! memory_limit = 67108864
//! max_stack_size = 1048576
//! gc_threshold = 262144
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::engine::{RuntimeLimits, DEFAULT_CONTEXT_NAME};
use crate::executor::{ExecutorConfig, DEFAULT_THREAD_NAME};

/// Environment variable overriding `engine.try_bytecode`
pub const ENV_TRY_BYTECODE: &str = "SCRIPTBRIDGE_TRY_BYTECODE";
/// Environment variable overriding `engine.use_custom_runtime`
pub const ENV_CUSTOM_RUNTIME: &str = "SCRIPTBRIDGE_CUSTOM_RUNTIME";

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Engine and executor settings
    #[serde(default)]
    pub engine: EngineConfig,
}

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub use_custom_runtime: bool,
    #[serde(default)]
    pub try_bytecode: bool,
    #[serde(default = "default_context_name")]
    pub context_name: String,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Heap limit in bytes, custom runtime only (0 = engine default)
    #[serde(default)]
    pub memory_limit: usize,
    /// Native stack limit in bytes, custom runtime only
    #[serde(default)]
    pub max_stack_size: usize,
    /// GC allocation threshold, custom runtime only
    #[serde(default)]
    pub gc_threshold: usize,
}

fn default_context_name() -> String {
    DEFAULT_CONTEXT_NAME.to_string()
}

fn default_thread_name() -> String {
    DEFAULT_THREAD_NAME.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_custom_runtime: false,
            try_bytecode: false,
            context_name: default_context_name(),
            thread_name: default_thread_name(),
            memory_limit: 0,
            max_stack_size: 0,
            gc_threshold: 0,
        }
    }
}

impl BridgeConfig {
    /// Executor configuration described by this file
    pub fn executor_config(&self) -> ExecutorConfig {
        let engine = &self.engine;
        ExecutorConfig {
            use_custom_runtime: engine.use_custom_runtime,
            try_bytecode: engine.try_bytecode,
            context_name: engine.context_name.clone(),
            thread_name: engine.thread_name.clone(),
            limits: RuntimeLimits {
                memory_limit: engine.memory_limit,
                max_stack_size: engine.max_stack_size,
                gc_threshold: engine.gc_threshold,
            },
        }
    }

    /// Apply `SCRIPTBRIDGE_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn with_overrides_from<F>(
        mut self,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TRY_BYTECODE).and_then(|v| parse_flag(ENV_TRY_BYTECODE, &v)) {
            self.engine.try_bytecode = value;
        }
        if let Some(value) = lookup(ENV_CUSTOM_RUNTIME).and_then(|v| parse_flag(ENV_CUSTOM_RUNTIME, &v)) {
            self.engine.use_custom_runtime = value;
        }
        self
    }
}

fn parse_flag(
    key: &str,
    value: &str,
) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        other => {
            warn!("ignoring {}={:?}: expected a boolean", key, other);
            None
        }
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("scriptbridge"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("scriptbridge"));
    }

    // Windows
    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("scriptbridge"));
    }

    None
}

/// Get the user config file path (~/.config/scriptbridge/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Check if user config exists
pub fn config_exists() -> bool {
    get_config_path().map(|p| p.exists()).unwrap_or(false)
}

/// Load user-level configuration
/// Returns default config if file doesn't exist
pub fn load_user_config() -> Result<BridgeConfig, ConfigError> {
    match get_config_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Ok(BridgeConfig::default()),
    }
}

/// Load configuration from an explicit file
pub fn load_config_from(path: &Path) -> Result<BridgeConfig, ConfigError> {
    debug!("loading config from {}", path.display());
    let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;
    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Save user-level configuration
pub fn save_user_config(config: &BridgeConfig) -> Result<PathBuf, ConfigError> {
    let dir = get_config_dir().ok_or(ConfigError::NoConfigDir)?;
    let path = dir.join("config.toml");
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save configuration to an explicit file, creating parent directories
pub fn save_config_to(
    config: &BridgeConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).map_err(ConfigError::IoError)?;
        }
    }

    let content = toml::to_string_pretty(config).map_err(ConfigError::SerializeError)?;
    fs::write(path, content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    ParseError(toml::de::Error),
    SerializeError(toml::ser::Error),
    NoConfigDir,
}

impl std::fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Config parse error: {}", e),
            ConfigError::SerializeError(e) => write!(f, "Config serialize error: {}", e),
            ConfigError::NoConfigDir => write!(f, "Cannot determine config directory"),
        }
    }
}

impl std::error::Error for ConfigError {}
