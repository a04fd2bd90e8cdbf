//! Configuration types for Mirage.
//!
//! A configuration directory holds one file per configuration group
//! (`*-config.yaml`, `*-config.yml` or `*-config.json`). Each group has an
//! optional root response, a list of resources and at most one root
//! security policy. Everything here is immutable once loaded.

mod resource;
mod security;
mod settings;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use resource::{DelayConfig, ResourceDefinition, ResponseConfig};
pub use security::{Effect, MatchOperator, Matcher, SecurityCondition, SecurityPolicy};
pub use settings::{EngineSettings, ListenSettings, SchedulingMode, ScriptPoolSettings};

const CONFIG_SUFFIXES: [&str; 3] = ["-config.yaml", "-config.yml", "-config.json"];

/// Fatal, load-time configuration problems.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("No configuration files found in {0}")]
    NoConfiguration(PathBuf),
    #[error(
        "Only one root security policy is allowed; found one in {first} and another in {second}"
    )]
    DuplicateRootSecurity { first: String, second: String },
    #[error("Invalid resource '{resource}': {reason}")]
    InvalidResource { resource: String, reason: String },
    #[error("Invalid route '{path}': {reason}")]
    InvalidRoute { path: String, reason: String },
    #[error("No script engine registered for '{file}'")]
    UnsupportedScript { file: String },
    #[error("Invalid script '{file}': {reason}")]
    InvalidScript { file: String, reason: String },
}

/// One configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigGroup {
    /// Root path served by `response` when no resource matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Root method; any method when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    /// Root security policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityPolicy>,
    /// Directory relative files resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// Where this group was loaded from, for diagnostics
    #[serde(skip)]
    pub source: String,
}

impl ConfigGroup {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let parsed: Result<ConfigGroup, String> = if is_json {
            serde_json::from_str(&contents).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&contents).map_err(|e| e.to_string())
        };
        let mut group = parsed.map_err(|message| ConfigurationError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        group.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        group.source = path.display().to_string();
        group.normalize();
        Ok(group)
    }

    /// Uppercase methods and anchor relative files to `base_dir`.
    fn normalize(&mut self) {
        let base_dir = self.base_dir.clone();
        if let Some(method) = self.method.as_mut() {
            *method = method.to_uppercase();
        }
        self.response.resolve_files(&base_dir);
        for resource in &mut self.resources {
            resource.method = resource.method.to_uppercase();
            resource.resolve_files(&base_dir);
        }
    }

    /// The group's own definition, used when no child resource matches.
    pub fn root_definition(&self) -> Option<ResourceDefinition> {
        let path = self.path.as_ref()?;
        let root = ResourceDefinition::new(
            self.method.clone().unwrap_or_else(|| "*".to_string()),
            path.clone(),
        )
        .with_response(self.response.clone());
        Some(root)
    }

    /// Whether the root definition serves `method` on `path`/`template`.
    pub fn root_serves(&self, method: &str, path: &str, template: Option<&str>) -> bool {
        let Some(root_path) = self.path.as_deref() else {
            return false;
        };
        let path_matches = root_path == path || Some(root_path) == template;
        let method_matches = self
            .method
            .as_deref()
            .map(|m| m == method)
            .unwrap_or(true);
        path_matches && method_matches
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(path) = &self.path {
            validate_path(path, "root")?;
        }
        if let Some(delay) = &self.response.delay {
            delay
                .validate()
                .map_err(|reason| ConfigurationError::InvalidResource {
                    resource: format!("{} (root)", self.source),
                    reason,
                })?;
        }
        for resource in &self.resources {
            validate_path(&resource.path, &resource.to_string())?;
            if resource.method.is_empty() {
                return Err(ConfigurationError::InvalidResource {
                    resource: resource.to_string(),
                    reason: "method must not be empty".to_string(),
                });
            }
            if let Some(delay) = &resource.response.delay {
                delay
                    .validate()
                    .map_err(|reason| ConfigurationError::InvalidResource {
                        resource: resource.to_string(),
                        reason,
                    })?;
            }
        }
        Ok(())
    }
}

fn validate_path(path: &str, resource: &str) -> Result<(), ConfigurationError> {
    if !path.starts_with('/') {
        return Err(ConfigurationError::InvalidResource {
            resource: resource.to_string(),
            reason: format!("path '{path}' must start with '/'"),
        });
    }
    Ok(())
}

/// Every configuration group of one deployment, validated as a set.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    groups: Vec<ConfigGroup>,
    root_security: Option<(usize, SecurityPolicy)>,
}

impl LoadedConfig {
    /// Load every `*-config.{yaml,yml,json}` file in `dir`, in file-name order.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, ConfigurationError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| ConfigurationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_config_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(ConfigurationError::NoConfiguration(dir.to_path_buf()));
        }

        let groups = files
            .iter()
            .map(|file| {
                debug!("Loading configuration file {}", file.display());
                ConfigGroup::from_file(file)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self::from_groups(groups)?;
        info!(
            "Loaded {} configuration group(s) with {} resource(s) from {}",
            config.groups.len(),
            config.resource_count(),
            dir.display()
        );
        Ok(config)
    }

    /// Validate a set of already-parsed groups.
    pub fn from_groups(groups: Vec<ConfigGroup>) -> Result<Self, ConfigurationError> {
        let mut root_security: Option<(usize, SecurityPolicy)> = None;

        for (index, group) in groups.iter().enumerate() {
            group.validate()?;

            if let Some(policy) = &group.security {
                if let Some((first, _)) = &root_security {
                    return Err(ConfigurationError::DuplicateRootSecurity {
                        first: groups[*first].source.clone(),
                        second: group.source.clone(),
                    });
                }
                root_security = Some((index, policy.clone()));
            }
        }

        Ok(Self {
            groups,
            root_security,
        })
    }

    pub fn groups(&self) -> &[ConfigGroup] {
        &self.groups
    }

    /// The single root security policy, if any group declares one.
    pub fn root_security(&self) -> Option<&SecurityPolicy> {
        self.root_security.as_ref().map(|(_, policy)| policy)
    }

    pub fn resource_count(&self) -> usize {
        self.groups.iter().map(|g| g.resources.len()).sum()
    }
}

fn is_config_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| CONFIG_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
        .unwrap_or(false)
}
