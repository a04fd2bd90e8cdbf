use super::{behaviour_from_json, Bindings, ScriptError, ScriptEvaluator};
use crate::behaviour::{ExecutionContext, ResponseBehaviour};
use mlua::prelude::*;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lua backend for `.lua` scripts.
///
/// Each execution gets a fresh Lua state, so scripts cannot leak globals
/// between requests. Sources are read once and syntax-checked on first use.
#[derive(Default)]
pub struct LuaEvaluator {
    sources: RwLock<HashMap<PathBuf, Arc<str>>>,
}

impl LuaEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self, script: &Path) -> Result<Arc<str>, ScriptError> {
        if let Some(source) = self.sources.read().get(script) {
            return Ok(Arc::clone(source));
        }

        let source: Arc<str> = std::fs::read_to_string(script)?.into();
        // Syntax check only; nothing runs
        Lua::new()
            .load(&*source)
            .set_name(script.display().to_string())
            .into_function()
            .map_err(|e| ScriptError::Compile(e.to_string()))?;

        self.sources
            .write()
            .insert(script.to_path_buf(), Arc::clone(&source));
        Ok(source)
    }
}

impl ScriptEvaluator for LuaEvaluator {
    fn name(&self) -> &'static str {
        "lua"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["lua"]
    }

    fn precompile(&self, script: &Path) -> Result<(), ScriptError> {
        self.load(script).map(|_| ())
    }

    fn execute(
        &self,
        script: &Path,
        context: &ExecutionContext,
        environment: &HashMap<String, String>,
        bindings: &Bindings,
    ) -> Result<ResponseBehaviour, ScriptError> {
        let source = self.load(script)?;
        let result = run(&source, script, context, environment, bindings)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        behaviour_from_json(&result)
    }
}

fn run(
    source: &str,
    script: &Path,
    context: &ExecutionContext,
    environment: &HashMap<String, String>,
    bindings: &Bindings,
) -> LuaResult<Value> {
    let lua = Lua::new();
    let globals = lua.globals();

    globals.set("context", json_to_lua(&lua, context.to_json())?)?;
    let env = lua.create_table()?;
    for (k, v) in environment {
        env.set(k.as_str(), v.as_str())?;
    }
    globals.set("env", env)?;
    for (name, value) in bindings {
        globals.set(name.as_str(), json_to_lua(&lua, value)?)?;
    }

    let result: LuaValue = lua
        .load(source)
        .set_name(script.display().to_string())
        .eval()?;
    lua_to_json(&lua, result)
}

/// Convert JSON Value to Lua value
fn json_to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    match value {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(LuaValue::Number(f))
            } else {
                Ok(LuaValue::Nil)
            }
        }
        Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Object(obj) => {
            let table = lua.create_table()?;
            for (k, v) in obj {
                table.set(k.as_str(), json_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

/// Convert Lua value to JSON Value; sequences become arrays, other tables objects
fn lua_to_json(lua: &Lua, value: LuaValue) -> LuaResult<Value> {
    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::Number(i.into())),
        LuaValue::Number(n) => {
            // Whole floats (e.g. 200.0) read as integers
            if n.fract() == 0.0 && n >= 0.0 && n <= u64::MAX as f64 {
                Ok(Value::Number((n as u64).into()))
            } else {
                Ok(serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null))
            }
        }
        LuaValue::String(s) => Ok(Value::String(s.to_str()?.to_string())),
        LuaValue::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                let mut arr = Vec::with_capacity(len);
                for i in 1..=len {
                    let v: LuaValue = table.raw_get(i)?;
                    arr.push(lua_to_json(lua, v)?);
                }
                Ok(Value::Array(arr))
            } else {
                let mut obj = serde_json::Map::new();
                for pair in table.pairs::<LuaValue, LuaValue>() {
                    let (k, v) = pair?;
                    let key = match k {
                        LuaValue::String(s) => s.to_str()?.to_string(),
                        LuaValue::Integer(i) => i.to_string(),
                        _ => continue,
                    };
                    obj.insert(key, lua_to_json(lua, v)?);
                }
                Ok(Value::Object(obj))
            }
        }
        _ => Ok(Value::Null),
    }
}
