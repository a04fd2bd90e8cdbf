//! The request-resolution pipeline:
//! resolve resource -> enforce security -> resolve behaviour -> dispatch.

use crate::behaviour::{
    ConfiguredStatusCode, ResponseBehaviour, ResponseBehaviourResolver, ScriptExecutionError,
    StatusCodeStrategy,
};
use crate::config::{
    ConfigurationError, Effect, EngineSettings, LoadedConfig, ResourceDefinition, SchedulingMode,
};
use crate::dispatch::{
    DispatchError, EmptyResponseSender, FallbackSender, ResponseBuilder, ResponseDispatcher,
};
use crate::request::HttpRequest;
use crate::resolver::{self, RouteMatch, RouteTable};
use crate::scripting::{
    PoolError, ScriptError, ScriptEvaluator, ScriptListener, ScriptPool, ScriptPoolConfig,
    ScriptRegistry,
};
use crate::security;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Per-request failures, each mapped to an HTTP status.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No resource configured for {0}")]
    NotFound(String),
    #[error("Access denied for {0}")]
    AccessDenied(String),
    #[error(transparent)]
    Script(#[from] ScriptExecutionError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Script pool is exhausted")]
    PoolExhausted,
    #[error("Script timed out after {0:?}")]
    ScriptTimeout(Duration),
    #[error("Script pool is unavailable")]
    PoolUnavailable,
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::AccessDenied(_) => StatusCode::UNAUTHORIZED,
            PipelineError::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::ScriptTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Script(_)
            | PipelineError::Dispatch(_)
            | PipelineError::PoolUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PoolError> for PipelineError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted => PipelineError::PoolExhausted,
            PoolError::Timeout(timeout) => PipelineError::ScriptTimeout(timeout),
            PoolError::ShutDown => PipelineError::PoolUnavailable,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Failed to start script pool: {0}")]
    ScriptPool(#[source] std::io::Error),
}

/// A resolved target: the definition to serve, its group's directory and
/// the route that selected it.
struct Target<'a> {
    definition: &'a ResourceDefinition,
    config_dir: &'a Path,
    route: Option<&'a RouteMatch>,
}

pub struct Pipeline {
    config: Arc<LoadedConfig>,
    /// Every resource of every group, in load order
    definitions: Vec<ResourceDefinition>,
    /// Group index of each entry in `definitions`
    owners: Vec<usize>,
    /// Root definition per group
    roots: Vec<Option<ResourceDefinition>>,
    routes: RouteTable,
    behaviours: Arc<ResponseBehaviourResolver>,
    status_codes: Arc<dyn StatusCodeStrategy>,
    dispatcher: ResponseDispatcher,
    mode: SchedulingMode,
    pool: Option<Arc<ScriptPool>>,
}

impl Pipeline {
    pub fn builder(config: LoadedConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &LoadedConfig {
        &self.config
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Like [`handle`](Self::handle), with errors rendered as JSON responses.
    pub async fn respond(&self, request: HttpRequest) -> Response<Full<Bytes>> {
        let description = request.to_string();
        match self.handle(request).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_code();
                match &e {
                    PipelineError::NotFound(_) | PipelineError::AccessDenied(_) => {
                        info!("{} -> {}: {}", description, status.as_u16(), e)
                    }
                    _ => error!("{} -> {}: {}", description, status.as_u16(), e),
                }
                ResponseBuilder::json_error(status, &e.to_string()).build_full()
            }
        }
    }

    pub async fn handle(&self, request: HttpRequest) -> Result<Response<Full<Bytes>>, PipelineError> {
        let request = Arc::new(request);
        let routes = self.routes.matches(request.path());

        let target = self
            .resolve_target(&request, &routes)
            .ok_or_else(|| PipelineError::NotFound(request.to_string()))?;
        debug!("{} resolved to {}", request, target.definition);
        let empty = HashMap::new();
        let path_params = target.route.map(|r| &r.path_params).unwrap_or(&empty);

        let effect = security::check(
            self.config.root_security(),
            target.definition.security.as_ref(),
            &request,
        );
        if effect == Effect::Deny {
            return Err(PipelineError::AccessDenied(request.to_string()));
        }

        let behaviour = self
            .resolve_behaviour(&target, &request, path_params)
            .await?;
        debug!(
            "Behaviour for {}: {} status={}",
            request,
            behaviour.kind(),
            behaviour.status_code()
        );

        let response = self
            .dispatcher
            .send(target.definition, target.config_dir, &request, &behaviour)
            .await?;
        Ok(response)
    }

    fn resolve_target<'a>(
        &'a self,
        request: &HttpRequest,
        routes: &'a [RouteMatch],
    ) -> Option<Target<'a>> {
        let method = request.method().as_str();
        let path = request.path();

        if let Some((index, route)) = resolver::resolve_routes(
            &self.definitions,
            method,
            path,
            routes,
            request.query_params(),
        ) {
            let group = &self.config.groups()[self.owners[index]];
            return Some(Target {
                definition: &self.definitions[index],
                config_dir: &group.base_dir,
                route,
            });
        }

        for (group, root) in self.config.groups().iter().zip(&self.roots) {
            let Some(definition) = root else {
                continue;
            };
            let route = routes
                .iter()
                .find(|r| group.root_serves(method, path, Some(r.template.as_str())));
            if route.is_some() || group.root_serves(method, path, None) {
                debug!("Falling back to root of {}", group.source);
                return Some(Target {
                    definition,
                    config_dir: &group.base_dir,
                    route,
                });
            }
        }
        None
    }

    async fn resolve_behaviour(
        &self,
        target: &Target<'_>,
        request: &Arc<HttpRequest>,
        path_params: &HashMap<String, String>,
    ) -> Result<ResponseBehaviour, PipelineError> {
        let scripted = target.definition.response.script_file.is_some();
        match (&self.pool, scripted) {
            (Some(pool), true) => {
                let behaviours = Arc::clone(&self.behaviours);
                let status_codes = Arc::clone(&self.status_codes);
                let definition = target.definition.clone();
                let config_dir = target.config_dir.to_path_buf();
                let request = Arc::clone(request);
                let path_params = path_params.clone();

                let behaviour = pool
                    .execute(move || {
                        behaviours.resolve(
                            &definition,
                            &request,
                            &path_params,
                            &config_dir,
                            status_codes.as_ref(),
                        )
                    })
                    .await??;
                Ok(behaviour)
            }
            _ => Ok(self.behaviours.resolve(
                target.definition,
                request,
                path_params,
                target.config_dir,
                self.status_codes.as_ref(),
            )?),
        }
    }
}

/// Assembles a [`Pipeline`], validating routes and scripts up front.
pub struct PipelineBuilder {
    config: LoadedConfig,
    settings: EngineSettings,
    scripts: ScriptRegistry,
    listeners: Vec<Arc<dyn ScriptListener>>,
    fallbacks: Vec<Arc<dyn FallbackSender>>,
    status_codes: Arc<dyn StatusCodeStrategy>,
}

impl PipelineBuilder {
    pub fn new(config: LoadedConfig) -> Self {
        Self {
            config,
            settings: EngineSettings::default(),
            scripts: ScriptRegistry::with_defaults(),
            listeners: Vec::new(),
            fallbacks: Vec::new(),
            status_codes: Arc::new(ConfiguredStatusCode),
        }
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn script_evaluator(mut self, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        self.scripts.register(evaluator);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ScriptListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Tried in registration order, before the built-in empty-body sender.
    pub fn fallback(mut self, sender: Arc<dyn FallbackSender>) -> Self {
        self.fallbacks.push(sender);
        self
    }

    pub fn status_code_strategy(mut self, strategy: Arc<dyn StatusCodeStrategy>) -> Self {
        self.status_codes = strategy;
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        let mut definitions = Vec::new();
        let mut owners = Vec::new();
        let mut roots = Vec::new();
        for (index, group) in self.config.groups().iter().enumerate() {
            for resource in &group.resources {
                definitions.push(resource.clone());
                owners.push(index);
            }
            roots.push(group.root_definition());
        }

        let routes = RouteTable::build(
            definitions
                .iter()
                .map(|d| d.path.as_str())
                .chain(roots.iter().flatten().map(|r| r.path.as_str())),
        )?;

        for definition in definitions.iter().chain(roots.iter().flatten()) {
            if let Some(script) = &definition.response.script_file {
                precompile(&self.scripts, Path::new(script))?;
            }
        }

        let pool = match self.settings.mode {
            SchedulingMode::Sync => None,
            SchedulingMode::Offload => {
                let pool = ScriptPool::new(ScriptPoolConfig::from(&self.settings.script_pool))
                    .map_err(BuildError::ScriptPool)?;
                Some(Arc::new(pool))
            }
        };

        let mut behaviours =
            ResponseBehaviourResolver::new(Arc::new(self.scripts), self.settings.environment);
        for listener in self.listeners {
            behaviours = behaviours.with_listener(listener);
        }

        let mut fallbacks = self.fallbacks;
        fallbacks.push(Arc::new(EmptyResponseSender));

        info!(
            "Pipeline ready: {} resource(s), {} route(s), {:?} mode",
            definitions.len(),
            routes.len(),
            self.settings.mode
        );

        Ok(Pipeline {
            config: Arc::new(self.config),
            definitions,
            owners,
            roots,
            routes,
            behaviours: Arc::new(behaviours),
            status_codes: self.status_codes,
            dispatcher: ResponseDispatcher::new(fallbacks),
            mode: self.settings.mode,
            pool,
        })
    }
}

fn precompile(scripts: &ScriptRegistry, script: &Path) -> Result<(), ConfigurationError> {
    let file = script.display().to_string();
    scripts.precompile(script).map_err(|e| match e {
        ScriptError::UnsupportedExtension(_) => ConfigurationError::UnsupportedScript { file },
        other => ConfigurationError::InvalidScript {
            file,
            reason: other.to_string(),
        },
    })
}

/// Load `dir` and build a pipeline with default collaborators.
pub fn from_dir(dir: impl Into<PathBuf>, settings: EngineSettings) -> Result<Pipeline, BuildError> {
    let config = LoadedConfig::from_dir(dir.into())?;
    Pipeline::builder(config).settings(settings).build()
}
