use super::{behaviour_from_json, Bindings, ScriptError, ScriptEvaluator};
use crate::behaviour::{BehaviourError, ExecutionContext, ResponseBehaviour};
use parking_lot::RwLock;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope, AST, INT};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Response builder handed to Rhai scripts by `respond()`.
///
/// Every builder method returns the updated builder so calls chain:
///
/// ```text
/// respond().withStatusCode(201).withFile("created.json").skipDefaultBehaviour()
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptResponse {
    behaviour: ResponseBehaviour,
}

impl ScriptResponse {
    fn with_status_code(&mut self, status: INT) -> Result<Self, Box<EvalAltResult>> {
        let status = u16::try_from(status)
            .map_err(|_| runtime_error(format!("invalid status code {status}")))?;
        self.behaviour.with_status_code(status);
        Ok(self.clone())
    }

    fn with_file(&mut self, file: &str) -> Self {
        self.behaviour.with_file(file);
        self.clone()
    }

    fn with_data(&mut self, data: Dynamic) -> Self {
        let data = match data.clone().try_cast::<String>() {
            Some(s) => s,
            None => dynamic_to_json(data).to_string(),
        };
        self.behaviour.with_data(data);
        self.clone()
    }

    fn with_empty(&mut self) -> Self {
        self.behaviour.with_empty();
        self.clone()
    }

    fn with_header(&mut self, name: &str, value: Dynamic) -> Self {
        let value = value
            .clone()
            .try_cast::<String>()
            .unwrap_or_else(|| value.to_string());
        self.behaviour.with_header(name, value);
        self.clone()
    }

    fn with_example_name(&mut self, name: &str) -> Self {
        self.behaviour.with_example_name(name);
        self.clone()
    }

    fn with_delay(&mut self, delay_ms: INT) -> Result<Self, Box<EvalAltResult>> {
        self.behaviour.with_delay(to_millis(delay_ms)?);
        Ok(self.clone())
    }

    fn with_delay_range(&mut self, min_ms: INT, max_ms: INT) -> Result<Self, Box<EvalAltResult>> {
        self.behaviour
            .with_delay_range(to_millis(min_ms)?, to_millis(max_ms)?);
        Ok(self.clone())
    }

    fn using_default_behaviour(&mut self) -> Result<Self, Box<EvalAltResult>> {
        self.behaviour
            .using_default_behaviour()
            .map_err(behaviour_error)?;
        Ok(self.clone())
    }

    fn skip_default_behaviour(&mut self) -> Result<Self, Box<EvalAltResult>> {
        self.behaviour
            .skip_default_behaviour()
            .map_err(behaviour_error)?;
        Ok(self.clone())
    }
}

fn to_millis(value: INT) -> Result<u64, Box<EvalAltResult>> {
    u64::try_from(value).map_err(|_| runtime_error(format!("invalid delay {value}")))
}

fn runtime_error(message: String) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE))
}

// Carried as the runtime error value so it can be recovered typed
fn behaviour_error(err: BehaviourError) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(err),
        Position::NONE,
    ))
}

fn find_behaviour_error(err: &EvalAltResult) -> Option<BehaviourError> {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => value.clone().try_cast::<BehaviourError>(),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => find_behaviour_error(inner),
        _ => None,
    }
}

/// Rhai backend for `.rhai` scripts.
///
/// One engine is shared by all requests; compiled ASTs are cached per file.
pub struct RhaiEvaluator {
    engine: Engine,
    cache: RwLock<HashMap<PathBuf, Arc<AST>>>,
}

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self {
            engine: Self::create_engine(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_engine() -> Engine {
        let mut engine = Engine::new();

        engine
            .register_type_with_name::<ScriptResponse>("Response")
            .register_fn("respond", ScriptResponse::default)
            .register_fn("withStatusCode", ScriptResponse::with_status_code)
            .register_fn("withFile", ScriptResponse::with_file)
            .register_fn("withData", ScriptResponse::with_data)
            .register_fn("withEmpty", ScriptResponse::with_empty)
            .register_fn("withHeader", ScriptResponse::with_header)
            .register_fn("withExampleName", ScriptResponse::with_example_name)
            .register_fn("withDelay", ScriptResponse::with_delay)
            .register_fn("withDelayRange", ScriptResponse::with_delay_range)
            .register_fn(
                "usingDefaultBehaviour",
                ScriptResponse::using_default_behaviour,
            )
            .register_fn(
                "skipDefaultBehaviour",
                ScriptResponse::skip_default_behaviour,
            );

        engine
    }

    fn compile(&self, script: &Path) -> Result<Arc<AST>, ScriptError> {
        if let Some(ast) = self.cache.read().get(script) {
            return Ok(Arc::clone(ast));
        }

        let source = std::fs::read_to_string(script)?;
        let ast = self
            .engine
            .compile(&source)
            .map_err(|e| ScriptError::Compile(format!("{}: {e}", script.display())))?;
        let ast = Arc::new(ast);

        self.cache
            .write()
            .insert(script.to_path_buf(), Arc::clone(&ast));
        Ok(ast)
    }

    fn parse_result(&self, result: Dynamic) -> Result<ResponseBehaviour, ScriptError> {
        if result.is_unit() {
            return Ok(ResponseBehaviour::new());
        }
        if result.is::<ScriptResponse>() {
            let response = result.cast::<ScriptResponse>();
            return Ok(response.behaviour);
        }
        if result.is::<Map>() {
            return behaviour_from_json(&dynamic_to_json(result));
        }
        Err(ScriptError::InvalidResult(format!(
            "expected respond() builder or map, got {}",
            result.type_name()
        )))
    }
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEvaluator for RhaiEvaluator {
    fn name(&self) -> &'static str {
        "rhai"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rhai"]
    }

    fn precompile(&self, script: &Path) -> Result<(), ScriptError> {
        self.compile(script).map(|_| ())
    }

    fn execute(
        &self,
        script: &Path,
        context: &ExecutionContext,
        environment: &HashMap<String, String>,
        bindings: &Bindings,
    ) -> Result<ResponseBehaviour, ScriptError> {
        let ast = self.compile(script)?;

        let mut env = Map::new();
        for (k, v) in environment {
            env.insert(k.as_str().into(), Dynamic::from(v.clone()));
        }

        let mut scope = Scope::new();
        scope.push("context", json_to_dynamic(context.to_json().clone()));
        scope.push("env", env);
        for (name, value) in bindings {
            scope.push(name.as_str(), json_to_dynamic(value.clone()));
        }

        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, &ast)
            .map_err(|e| match find_behaviour_error(&e) {
                Some(err) => ScriptError::Behaviour(err),
                None => ScriptError::Runtime(e.to_string()),
            })?;

        self.parse_result(result)
    }
}

// Helper functions to convert between Rhai Dynamic and serde_json::Value

pub(super) fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

pub(super) fn dynamic_to_json(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        Value::Number(serde_json::Number::from_f64(f).unwrap_or(0.into()))
    } else if let Some(s) = value.clone().try_cast::<String>() {
        Value::String(s)
    } else if let Some(arr) = value.clone().try_cast::<Vec<Dynamic>>() {
        Value::Array(arr.into_iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        let mut obj = serde_json::Map::new();
        for (k, v) in map {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        Value::Object(obj)
    } else {
        Value::String(format!("{value}"))
    }
}
