//! In-memory context for unit tests that do not need a real interpreter.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use super::{HostFunction, ScriptContext};
use crate::errors::{BridgeError, BridgeResult, ScriptError};

/// Payload prefix `RecordingContext` accepts as bytecode.
pub(crate) const GOOD_PAYLOAD: &[u8] = b"ok:";

/// Records what it was asked to do.
///
/// - source containing `syntax error` fails to evaluate
/// - source containing `engine bug` panics
/// - bytecode payloads must start with [`GOOD_PAYLOAD`]
/// - `Calc.add` sums its numeric arguments, `Calc.fail` throws
/// - `Context.name` returns the context name at call time
#[derive(Default)]
pub(crate) struct RecordingContext {
    pub name: String,
    pub evaluated_sources: Vec<String>,
    pub evaluated_payloads: Vec<Vec<u8>>,
    pub globals: HashMap<String, JsonValue>,
    pub host_functions: HashMap<String, HostFunction>,
    pub calls: Vec<String>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self {
            name: "recording".to_string(),
            ..Self::default()
        }
    }
}

impl ScriptContext for RecordingContext {
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
        false
    }

    fn has_evaluated(&self) -> bool {
        !self.evaluated_sources.is_empty() || !self.evaluated_payloads.is_empty()
    }

    fn install_global(
        &mut self,
        name: &str,
        function: HostFunction,
    ) -> BridgeResult<()> {
        if self.has_evaluated() {
            return Err(BridgeError::state("late install"));
        }
        self.host_functions.insert(name.to_string(), function);
        Ok(())
    }

    fn set_global_value(
        &mut self,
        name: &str,
        value: &JsonValue,
    ) -> BridgeResult<()> {
        self.globals.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn evaluate(
        &mut self,
        source: &str,
        source_url: &str,
    ) -> Result<JsonValue, ScriptError> {
        self.evaluated_sources.push(source.to_string());
        if source.contains("engine bug") {
            panic!("engine bug while evaluating {}", source_url);
        }
        if source.contains("syntax error") {
            return Err(ScriptError::new("SyntaxError: unexpected token")
                .with_source_url(source_url)
                .with_location(Some(1), Some(1)));
        }
        Ok(JsonValue::Null)
    }

    fn evaluate_bytecode(
        &mut self,
        payload: &[u8],
        source_url: &str,
    ) -> Result<(), ScriptError> {
        if !payload.starts_with(GOOD_PAYLOAD) {
            return Err(ScriptError::new("invalid bytecode image").with_source_url(source_url));
        }
        self.evaluated_payloads.push(payload.to_vec());
        Ok(())
    }

    fn compile_bytecode(
        &mut self,
        source: &str,
        _source_url: &str,
    ) -> Result<Vec<u8>, ScriptError> {
        let mut payload = GOOD_PAYLOAD.to_vec();
        payload.extend_from_slice(source.as_bytes());
        Ok(payload)
    }

    fn call_function(
        &mut self,
        path: &[&str],
        args: &[JsonValue],
    ) -> BridgeResult<JsonValue> {
        let joined = path.join(".");
        self.calls.push(joined.clone());
        if let Some(function) = self.host_functions.get(&joined) {
            return function(args).map_err(|m| BridgeError::Script(ScriptError::new(m)));
        }
        match joined.as_str() {
            "Calc.add" => Ok(JsonValue::from(
                args.iter().filter_map(JsonValue::as_i64).sum::<i64>(),
            )),
            "Calc.fail" => Err(BridgeError::Script(ScriptError::new("Error: calc failed"))),
            "Context.name" => Ok(JsonValue::from(self.name.clone())),
            _ => match path.split_last() {
                Some((method, module)) => Err(BridgeError::not_found(module.join("."), *method)),
                None => Err(BridgeError::not_found("", "")),
            },
        }
    }
}
