//! Path template lookup.
//!
//! Each distinct configured path (literal or templated) is compiled once at
//! load time into its own single-route `matchit` router. At request time
//! every compiled route is tried, so a literal path configured for one
//! method never hides a template configured for another.

use crate::config::ConfigurationError;
use matchit::Router;
use std::collections::HashMap;

/// Template and parameters a request path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub template: String,
    pub path_params: HashMap<String, String>,
}

struct CompiledRoute {
    template: String,
    params: usize,
    router: Router<()>,
}

/// Lookup from concrete request paths to the configured templates serving them.
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Build a table from configured paths; duplicates are collapsed.
    pub fn build<'a, I>(paths: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut table = Self::new();
        for path in paths {
            table.insert(path)?;
        }
        Ok(table)
    }

    /// Compile `template`. Routes stay ordered by parameter count, then
    /// insertion order, so literal paths are always tried first.
    pub fn insert(&mut self, template: &str) -> Result<(), ConfigurationError> {
        if self.routes.iter().any(|r| r.template == template) {
            return Ok(());
        }

        let mut router = Router::new();
        router
            .insert(template, ())
            .map_err(|e| ConfigurationError::InvalidRoute {
                path: template.to_string(),
                reason: e.to_string(),
            })?;

        let params = template.matches('{').count() - template.matches("{{").count() * 2;
        let position = self
            .routes
            .iter()
            .position(|r| r.params > params)
            .unwrap_or(self.routes.len());
        self.routes.insert(
            position,
            CompiledRoute {
                template: template.to_string(),
                params,
                router,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Every template serving `path`, literal paths first.
    pub fn matches(&self, path: &str) -> Vec<RouteMatch> {
        self.routes
            .iter()
            .filter_map(|route| {
                let matched = route.router.at(path).ok()?;
                let path_params = matched
                    .params
                    .iter()
                    .map(|(name, value)| {
                        let decoded = urlencoding::decode(value)
                            .map(|v| v.into_owned())
                            .unwrap_or_else(|_| value.to_string());
                        (name.to_string(), decoded)
                    })
                    .collect();
                Some(RouteMatch {
                    template: route.template.clone(),
                    path_params,
                })
            })
            .collect()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
