//! Turns a matched resource into a [`ResponseBehaviour`], running its
//! script when one is configured.

use super::{BehaviourKind, ExecutionContext, PerformanceSimulation, ResponseBehaviour};
use crate::config::ResourceDefinition;
use crate::request::HttpRequest;
use crate::scripting::{Bindings, ScriptError, ScriptListener, ScriptRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Chooses the status code a resource answers with when nothing else does.
pub trait StatusCodeStrategy: Send + Sync {
    fn calculate(&self, definition: &ResourceDefinition) -> u16;
}

/// The configured `statusCode`, else 200.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredStatusCode;

impl StatusCodeStrategy for ConfiguredStatusCode {
    fn calculate(&self, definition: &ResourceDefinition) -> u16 {
        definition.response.status_code.unwrap_or(200)
    }
}

#[derive(Debug, Error)]
#[error("Failed to execute script {} for {request}: {source}", .script.display())]
pub struct ScriptExecutionError {
    pub script: PathBuf,
    pub request: String,
    #[source]
    pub source: ScriptError,
}

pub struct ResponseBehaviourResolver {
    scripts: Arc<ScriptRegistry>,
    listeners: Vec<Arc<dyn ScriptListener>>,
    environment: Arc<HashMap<String, String>>,
}

impl ResponseBehaviourResolver {
    pub fn new(scripts: Arc<ScriptRegistry>, environment: HashMap<String, String>) -> Self {
        Self {
            scripts,
            listeners: Vec::new(),
            environment: Arc::new(environment),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ScriptListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn scripts(&self) -> &ScriptRegistry {
        &self.scripts
    }

    /// Work out the behaviour for `definition`.
    ///
    /// `config_dir` is the directory of the configuration group that owns
    /// the definition; scripts see it as `config`.
    pub fn resolve(
        &self,
        definition: &ResourceDefinition,
        request: &Arc<HttpRequest>,
        path_params: &HashMap<String, String>,
        config_dir: &Path,
        strategy: &dyn StatusCodeStrategy,
    ) -> Result<ResponseBehaviour, ScriptExecutionError> {
        let base_status_code = strategy.calculate(definition);

        let Some(script) = definition.response.script_file.as_deref() else {
            let mut behaviour = ResponseBehaviour::new();
            apply_defaults(&mut behaviour, definition, base_status_code);
            debug!("No script for {}; using configured response", definition);
            return Ok(behaviour);
        };
        let script = Path::new(script);

        let context = ExecutionContext::new(Arc::clone(request), path_params.clone());
        let mut bindings = Bindings::new();
        bindings.insert(
            "config".to_string(),
            Value::String(config_dir.display().to_string()),
        );
        for listener in &self.listeners {
            listener.before_building_context(request, &mut bindings, &context);
        }

        let mut behaviour = self
            .scripts
            .execute(script, &context, &self.environment, &bindings)
            .map_err(|source| ScriptExecutionError {
                script: script.to_path_buf(),
                request: request.to_string(),
                source,
            })?;

        match behaviour.kind() {
            BehaviourKind::ShortCircuit => {
                debug!("Script {} short-circuited defaults", script.display());
            }
            BehaviourKind::Default | BehaviourKind::Unset => {
                apply_defaults(&mut behaviour, definition, base_status_code);
            }
        }

        for listener in &self.listeners {
            listener.after_successful_execution(&bindings, &behaviour);
        }
        Ok(behaviour)
    }
}

/// Fill blank fields from the resource's configured response.
fn apply_defaults(
    behaviour: &mut ResponseBehaviour,
    definition: &ResourceDefinition,
    base_status_code: u16,
) {
    let config = &definition.response;
    behaviour.default_if_unset();
    behaviour.fill_status_code(base_status_code);
    behaviour.fill_file(config.static_file.as_deref());
    behaviour.fill_data(config.static_data.as_deref());
    behaviour.fill_headers(&config.headers);
    behaviour.fill_example_name(config.example_name.as_deref());
    behaviour.fill_performance(config.delay.as_ref().map(PerformanceSimulation::from));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviour::BehaviourError;
    use crate::config::{DelayConfig, ResponseConfig};
    use crate::scripting::ScriptEvaluator;
    use hyper::{Method, Uri};
    use parking_lot::Mutex;
    use std::io::Write;

    type Script = Box<dyn Fn(&ExecutionContext, &Bindings) -> Result<ResponseBehaviour, ScriptError> + Send + Sync>;

    struct FakeEvaluator {
        script: Script,
    }

    impl ScriptEvaluator for FakeEvaluator {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["fake"]
        }

        fn execute(
            &self,
            _script: &Path,
            context: &ExecutionContext,
            _environment: &HashMap<String, String>,
            bindings: &Bindings,
        ) -> Result<ResponseBehaviour, ScriptError> {
            (self.script)(context, bindings)
        }
    }

    fn resolver<F>(script: F) -> ResponseBehaviourResolver
    where
        F: Fn(&ExecutionContext, &Bindings) -> Result<ResponseBehaviour, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        let mut registry = ScriptRegistry::new();
        registry.register(Arc::new(FakeEvaluator {
            script: Box::new(script),
        }));
        ResponseBehaviourResolver::new(Arc::new(registry), HashMap::new())
    }

    fn request() -> Arc<HttpRequest> {
        Arc::new(HttpRequest::new(Method::GET, Uri::from_static("/pets/1")))
    }

    fn scripted(response: ResponseConfig) -> ResourceDefinition {
        ResourceDefinition::new("GET", "/pets/{id}")
            .with_response(response.with_script_file("/mocks/pets.fake"))
    }

    fn resolve(
        resolver: &ResponseBehaviourResolver,
        definition: &ResourceDefinition,
    ) -> Result<ResponseBehaviour, ScriptExecutionError> {
        resolver.resolve(
            definition,
            &request(),
            &HashMap::from([("id".to_string(), "1".to_string())]),
            Path::new("/mocks"),
            &ConfiguredStatusCode,
        )
    }

    #[test]
    fn test_configured_status_code_strategy() {
        let plain = ResourceDefinition::new("GET", "/a");
        assert_eq!(ConfiguredStatusCode.calculate(&plain), 200);

        let explicit = ResourceDefinition::new("GET", "/a")
            .with_response(ResponseConfig::default().with_status_code(204));
        assert_eq!(ConfiguredStatusCode.calculate(&explicit), 204);
    }

    #[test]
    fn test_static_resource_uses_configuration() {
        let definition = ResourceDefinition::new("GET", "/pets").with_response(
            ResponseConfig::default()
                .with_status_code(203)
                .with_static_file("/mocks/pets.json")
                .with_header("X-Source", "config"),
        );
        let behaviour = resolve(&resolver(|_, _| unreachable!()), &definition).unwrap();

        assert_eq!(behaviour.kind(), BehaviourKind::Default);
        assert_eq!(behaviour.status_code(), 203);
        assert_eq!(behaviour.response_file(), Some("/mocks/pets.json"));
        assert_eq!(
            behaviour.response_headers().get("X-Source"),
            Some(&"config".to_string())
        );
    }

    #[test]
    fn test_default_behaviour_is_backfilled() {
        let definition = scripted(
            ResponseConfig::default()
                .with_status_code(202)
                .with_static_file("/mocks/default.json")
                .with_header("X-Config", "yes")
                .with_header("X-Shared", "config"),
        );
        let resolver = resolver(|_, _| {
            let mut behaviour = ResponseBehaviour::new();
            behaviour
                .with_header("x-shared", "script")
                .using_default_behaviour()?;
            Ok(behaviour)
        });

        let behaviour = resolve(&resolver, &definition).unwrap();
        assert_eq!(behaviour.status_code(), 202);
        assert_eq!(behaviour.response_file(), Some("/mocks/default.json"));
        assert_eq!(
            behaviour.response_headers().get("x-shared"),
            Some(&"script".to_string())
        );
        assert!(behaviour.response_headers().get("X-Shared").is_none());
        assert_eq!(
            behaviour.response_headers().get("X-Config"),
            Some(&"yes".to_string())
        );
    }

    #[test]
    fn test_script_values_survive_backfill() {
        let definition = scripted(
            ResponseConfig::default()
                .with_status_code(202)
                .with_static_file("/mocks/default.json"),
        );
        let resolver = resolver(|_, _| {
            let mut behaviour = ResponseBehaviour::new();
            behaviour
                .with_status_code(409)
                .with_file("conflict.json")
                .using_default_behaviour()?;
            Ok(behaviour)
        });

        let behaviour = resolve(&resolver, &definition).unwrap();
        assert_eq!(behaviour.status_code(), 409);
        assert_eq!(behaviour.response_file(), Some("conflict.json"));
    }

    #[test]
    fn test_short_circuit_is_verbatim() {
        let definition = scripted(
            ResponseConfig::default()
                .with_status_code(202)
                .with_static_file("/mocks/default.json"),
        );
        let resolver = resolver(|_, _| {
            let mut behaviour = ResponseBehaviour::new();
            behaviour.with_data("inline").skip_default_behaviour()?;
            Ok(behaviour)
        });

        let behaviour = resolve(&resolver, &definition).unwrap();
        assert_eq!(behaviour.kind(), BehaviourKind::ShortCircuit);
        assert_eq!(behaviour.status_code(), 0);
        assert!(behaviour.response_file().is_none());
        assert_eq!(behaviour.response_data(), Some("inline"));
    }

    #[test]
    fn test_unset_result_treated_as_default() {
        let mut response = ResponseConfig::default().with_static_data(r#"{"ok":true}"#);
        response.delay = Some(DelayConfig {
            exact: Some(10),
            ..Default::default()
        });
        let definition = scripted(response);
        let resolver = resolver(|_, _| Ok(ResponseBehaviour::new()));

        let behaviour = resolve(&resolver, &definition).unwrap();
        assert_eq!(behaviour.kind(), BehaviourKind::Default);
        assert_eq!(behaviour.status_code(), 200);
        assert_eq!(behaviour.response_data(), Some(r#"{"ok":true}"#));
        assert_eq!(
            behaviour.performance_simulation(),
            Some(PerformanceSimulation::Exact { delay_ms: 10 })
        );
    }

    #[test]
    fn test_backfill_is_idempotent() {
        let definition = ResourceDefinition::new("GET", "/pets").with_response(
            ResponseConfig::default()
                .with_status_code(201)
                .with_static_file("/mocks/pets.json")
                .with_header("X-A", "1"),
        );
        let mut behaviour = ResponseBehaviour::new();
        behaviour.with_header("X-B", "2");

        apply_defaults(&mut behaviour, &definition, 201);
        let once = behaviour.clone();
        apply_defaults(&mut behaviour, &definition, 201);
        assert_eq!(behaviour, once);
    }

    #[test]
    fn test_script_failure_names_script_and_request() {
        let definition = scripted(ResponseConfig::default());
        let resolver = resolver(|_, _| Err(ScriptError::Runtime("boom".to_string())));

        let err = resolve(&resolver, &definition).unwrap_err();
        assert_eq!(err.script, PathBuf::from("/mocks/pets.fake"));
        assert_eq!(err.request, "GET /pets/1");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_already_configured_surfaces_as_script_error() {
        let definition = scripted(ResponseConfig::default());
        let resolver = resolver(|_, _| {
            let mut behaviour = ResponseBehaviour::new();
            behaviour.using_default_behaviour()?;
            behaviour.skip_default_behaviour()?;
            Ok(behaviour)
        });

        let err = resolve(&resolver, &definition).unwrap_err();
        assert!(matches!(
            err.source,
            ScriptError::Behaviour(BehaviourError::AlreadyConfigured(BehaviourKind::Default))
        ));
    }

    #[derive(Default)]
    struct RecordingListener {
        seen: Mutex<Vec<u16>>,
    }

    impl ScriptListener for RecordingListener {
        fn before_building_context(
            &self,
            _request: &HttpRequest,
            bindings: &mut Bindings,
            context: &ExecutionContext,
        ) {
            bindings.insert("petId".to_string(), Value::String(context.path_params()["id"].clone()));
        }

        fn after_successful_execution(&self, _bindings: &Bindings, behaviour: &ResponseBehaviour) {
            self.seen.lock().push(behaviour.status_code());
        }
    }

    #[test]
    fn test_listeners_see_bindings_and_result() {
        let listener = Arc::new(RecordingListener::default());
        let resolver = resolver(|_, bindings| {
            let mut behaviour = ResponseBehaviour::new();
            if bindings.get("petId") == Some(&Value::String("1".to_string()))
                && bindings.get("config") == Some(&Value::String("/mocks".to_string()))
            {
                behaviour.with_status_code(299);
            }
            Ok(behaviour)
        })
        .with_listener(listener.clone());

        let behaviour = resolve(&resolver, &scripted(ResponseConfig::default())).unwrap();
        assert_eq!(behaviour.status_code(), 299);
        assert_eq!(*listener.seen.lock(), vec![299]);
    }

    #[test]
    fn test_rhai_script_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("pets.rhai");
        let mut file = std::fs::File::create(&script).unwrap();
        write!(
            file,
            r#"
            if context.pathParams.id == "1" {{
                respond().withStatusCode(200).withData("first").usingDefaultBehaviour()
            }} else {{
                respond().withStatusCode(404).skipDefaultBehaviour()
            }}
            "#
        )
        .unwrap();

        let definition = ResourceDefinition::new("GET", "/pets/{id}").with_response(
            ResponseConfig::default().with_script_file(script.display().to_string()),
        );
        let resolver = ResponseBehaviourResolver::new(
            Arc::new(ScriptRegistry::with_defaults()),
            HashMap::new(),
        );

        let behaviour = resolve(&resolver, &definition).unwrap();
        assert_eq!(behaviour.status_code(), 200);
        assert_eq!(behaviour.response_data(), Some("first"));
    }
}
