//! Resource and response configuration.

use super::SecurityPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// A configured rule mapping a request shape to a response strategy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Literal (`/pets`) or templated (`/pets/{id}`) path
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub path_params: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub response: ResponseConfig,
    /// Overrides the root policy for this resource only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityPolicy>,
}

pub(crate) fn default_method() -> String {
    "GET".to_string()
}

impl ResourceDefinition {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            path_params: HashMap::new(),
            query_params: HashMap::new(),
            response: ResponseConfig::default(),
            security: None,
        }
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn with_response(mut self, response: ResponseConfig) -> Self {
        self.response = response;
        self
    }

    pub fn with_security(mut self, security: SecurityPolicy) -> Self {
        self.security = Some(security);
        self
    }

    /// Rewrite relative file references so they resolve against `base_dir`.
    pub(crate) fn resolve_files(&mut self, base_dir: &Path) {
        self.response.resolve_files(base_dir);
    }
}

impl fmt::Display for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        if !self.path_params.is_empty() {
            write!(f, " pathParams={:?}", self.path_params)?;
        }
        if !self.query_params.is_empty() {
            write!(f, " queryParams={:?}", self.query_params)?;
        }
        Ok(())
    }
}

/// How the response for a resource is produced.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, alias = "file", skip_serializing_if = "Option::is_none")]
    pub static_file: Option<String>,
    /// Inline body, used when no file is configured
    #[serde(default, alias = "content", skip_serializing_if = "Option::is_none")]
    pub static_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelayConfig>,
}

impl ResponseConfig {
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_static_file(mut self, file: impl Into<String>) -> Self {
        self.static_file = Some(file.into());
        self
    }

    pub fn with_static_data(mut self, data: impl Into<String>) -> Self {
        self.static_data = Some(data.into());
        self
    }

    pub fn with_script_file(mut self, file: impl Into<String>) -> Self {
        self.script_file = Some(file.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub(crate) fn resolve_files(&mut self, base_dir: &Path) {
        for file in [&mut self.static_file, &mut self.script_file]
            .into_iter()
            .flatten()
        {
            if Path::new(file.as_str()).is_relative() {
                *file = base_dir.join(file.as_str()).to_string_lossy().into_owned();
            }
        }
    }
}

/// Configured artificial latency: `{ exact: 100 }` or `{ min: 50, max: 200 }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DelayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

impl DelayConfig {
    pub fn validate(&self) -> Result<(), String> {
        match (self.exact, self.min, self.max) {
            (Some(_), None, None) => Ok(()),
            (Some(_), _, _) => Err("'exact' cannot be combined with 'min'/'max'".to_string()),
            (None, Some(min), Some(max)) if min > max => {
                Err(format!("'min' ({min}) is greater than 'max' ({max})"))
            }
            (None, None, None) => Err("one of 'exact' or 'min'/'max' is required".to_string()),
            _ => Ok(()),
        }
    }
}
