//! Bridge errors
//!
//! Script failures and resolution misses are runtime conditions and travel back
//! to the caller as values. State misuse and double consumption of a provider
//! are contract violations: they are logged at `error` level the moment they are
//! raised and then returned, so they never pass silently.

use std::any::Any;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Bridge result
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Compile or runtime failure reported by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptError {
    /// Engine-reported message, including the error name when known
    pub message: String,
    /// Origin of the script that failed
    pub source_url: Option<String>,
    /// 1-based line, when the engine reports one
    pub line: Option<u32>,
    /// 1-based column, when the engine reports one
    pub column: Option<u32>,
    /// Engine stack trace
    pub stack: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_source_url(
        mut self,
        source_url: impl Into<String>,
    ) -> Self {
        self.source_url = Some(source_url.into());
        self
    }

    pub fn with_location(
        mut self,
        line: Option<u32>,
        column: Option<u32>,
    ) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_stack(
        mut self,
        stack: Option<String>,
    ) -> Self {
        self.stack = stack.filter(|s| !s.trim().is_empty());
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.message)?;
        match (&self.source_url, self.line, self.column) {
            (Some(url), Some(line), Some(column)) => write!(f, " ({}:{}:{})", url, line, column),
            (Some(url), Some(line), None) => write!(f, " ({}:{})", url, line),
            (Some(url), None, _) => write!(f, " ({})", url),
            (None, Some(line), Some(column)) => write!(f, " (line {}, column {})", line, column),
            (None, Some(line), None) => write!(f, " (line {})", line),
            (None, None, _) => Ok(()),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl ScriptError {
    /// Error reported in place of a host-side panic.
    pub(crate) fn from_panic(
        what: &str,
        payload: &(dyn Any + Send),
    ) -> Self {
        let message = panic_message(payload);
        error!("{} panicked: {}", what, message);
        Self::new(format!("{} panicked: {}", what, message))
    }
}

/// Errors crossing the host/script boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Not found: {module}.{method}")]
    NotFound { module: String, method: String },

    #[error("Context provider already consumed")]
    AlreadyConsumed,
}

impl BridgeError {
    /// API misuse. Logged immediately.
    pub(crate) fn state(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("executor misuse: {}", message);
        BridgeError::State(message)
    }

    /// Second take on a provider handoff. Logged immediately.
    pub(crate) fn already_consumed() -> Self {
        error!("executor misuse: context provider consumed twice");
        BridgeError::AlreadyConsumed
    }

    pub(crate) fn not_found(
        module: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        BridgeError::NotFound {
            module: module.into(),
            method: method.into(),
        }
    }

    /// Human-readable message of the error record.
    pub fn message(&self) -> String {
        match self {
            BridgeError::Script(err) => err.message.clone(),
            other => other.to_string(),
        }
    }

    /// Underlying engine diagnostic, if this is a script failure.
    pub fn diagnostic(&self) -> Option<&ScriptError> {
        match self {
            BridgeError::Script(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the error signals a violated API contract rather than a
    /// runtime condition.
    pub fn is_misuse(&self) -> bool {
        matches!(self, BridgeError::State(_) | BridgeError::AlreadyConsumed)
    }
}
