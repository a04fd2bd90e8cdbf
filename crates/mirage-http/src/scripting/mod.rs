use crate::behaviour::{BehaviourError, ExecutionContext, ResponseBehaviour};
use crate::request::HttpRequest;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

mod rhai_engine;
pub use rhai_engine::RhaiEvaluator;

#[cfg(feature = "lua")]
mod lua_engine;
#[cfg(feature = "lua")]
pub use lua_engine::LuaEvaluator;

// Bounded worker pool for offloaded execution
mod script_pool;
pub use script_pool::{PoolError, ScriptPool, ScriptPoolConfig};

/// Extra values made visible to scripts, keyed by global name.
pub type Bindings = HashMap<String, Value>;

/// Errors raised while loading or running a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to compile script: {0}")]
    Compile(String),
    #[error("Script execution error: {0}")]
    Runtime(String),
    #[error("Script returned an invalid response: {0}")]
    InvalidResult(String),
    #[error(transparent)]
    Behaviour(#[from] BehaviourError),
    #[error("No script engine registered for extension '{0}'")]
    UnsupportedExtension(String),
}

/// A scripting backend.
pub trait ScriptEvaluator: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// File extensions (without the dot) this engine handles
    fn extensions(&self) -> &'static [&'static str];

    /// Load and compile ahead of the first request; errors are configuration errors.
    fn precompile(&self, _script: &Path) -> Result<(), ScriptError> {
        Ok(())
    }

    fn execute(
        &self,
        script: &Path,
        context: &ExecutionContext,
        environment: &HashMap<String, String>,
        bindings: &Bindings,
    ) -> Result<ResponseBehaviour, ScriptError>;
}

/// Observes script execution without the core depending on the observer.
pub trait ScriptListener: Send + Sync {
    /// Called before a script runs; may add bindings.
    fn before_building_context(
        &self,
        _request: &HttpRequest,
        _bindings: &mut Bindings,
        _context: &ExecutionContext,
    ) {
    }

    /// Called after a script produced a behaviour.
    fn after_successful_execution(&self, _bindings: &Bindings, _behaviour: &ResponseBehaviour) {}
}

/// Maps script file extensions to evaluators.
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    evaluators: HashMap<String, Arc<dyn ScriptEvaluator>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rhai, plus Lua when the `lua` feature is enabled.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RhaiEvaluator::new()));
        #[cfg(feature = "lua")]
        registry.register(Arc::new(LuaEvaluator::new()));
        registry
    }

    /// Register `evaluator` for each of its extensions, replacing earlier ones.
    pub fn register(&mut self, evaluator: Arc<dyn ScriptEvaluator>) {
        for extension in evaluator.extensions() {
            self.evaluators
                .insert(extension.to_string(), Arc::clone(&evaluator));
        }
    }

    pub fn evaluator_for(&self, script: &Path) -> Result<&Arc<dyn ScriptEvaluator>, ScriptError> {
        let extension = script
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        self.evaluators
            .get(&extension)
            .ok_or(ScriptError::UnsupportedExtension(extension))
    }

    pub fn precompile(&self, script: &Path) -> Result<(), ScriptError> {
        self.evaluator_for(script)?.precompile(script)
    }

    pub fn execute(
        &self,
        script: &Path,
        context: &ExecutionContext,
        environment: &HashMap<String, String>,
        bindings: &Bindings,
    ) -> Result<ResponseBehaviour, ScriptError> {
        let evaluator = self.evaluator_for(script)?;
        tracing::debug!(
            "Executing {} script {}",
            evaluator.name(),
            script.display()
        );
        evaluator.execute(script, context, environment, bindings)
    }
}

/// Build a behaviour from the table/map form scripts may return:
///
/// ```text
/// { statusCode, file, data, headers: {..}, exampleName,
///   delay: { exact } | { min, max }, behaviour: "default" | "short-circuit" }
/// ```
///
/// `null` means the script made no decision.
pub fn behaviour_from_json(value: &Value) -> Result<ResponseBehaviour, ScriptError> {
    let mut behaviour = ResponseBehaviour::new();
    let map = match value {
        Value::Null => return Ok(behaviour),
        Value::Object(map) => map,
        other => {
            return Err(ScriptError::InvalidResult(format!(
                "expected a map, got {other}"
            )))
        }
    };

    if let Some(status) = map.get("statusCode") {
        let status = status
            .as_u64()
            .and_then(|s| u16::try_from(s).ok())
            .ok_or_else(|| ScriptError::InvalidResult(format!("invalid statusCode {status}")))?;
        behaviour.with_status_code(status);
    }
    if let Some(file) = map.get("file").and_then(Value::as_str) {
        behaviour.with_file(file);
    }
    if let Some(data) = map.get("data") {
        match data {
            Value::Null => {}
            Value::String(s) => {
                behaviour.with_data(s.clone());
            }
            other => {
                behaviour.with_data(other.to_string());
            }
        }
    }
    if let Some(headers) = map.get("headers").and_then(Value::as_object) {
        for (name, value) in headers {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            behaviour.with_header(name.clone(), value);
        }
    }
    if let Some(name) = map.get("exampleName").and_then(Value::as_str) {
        behaviour.with_example_name(name);
    }
    if let Some(delay) = map.get("delay") {
        if let Some(exact) = delay.get("exact").and_then(Value::as_u64) {
            behaviour.with_delay(exact);
        } else if let Some(ms) = delay.as_u64() {
            behaviour.with_delay(ms);
        } else {
            let min = delay.get("min").and_then(Value::as_u64).unwrap_or(0);
            let max = delay.get("max").and_then(Value::as_u64).unwrap_or(min);
            behaviour.with_delay_range(min, max);
        }
    }
    match map.get("behaviour").and_then(Value::as_str) {
        None => {}
        Some("default") => {
            behaviour.using_default_behaviour()?;
        }
        Some("short-circuit") | Some("shortCircuit") => {
            behaviour.skip_default_behaviour()?;
        }
        Some(other) => {
            return Err(ScriptError::InvalidResult(format!(
                "unknown behaviour '{other}'"
            )))
        }
    }
    Ok(behaviour)
}
