//! Read-only request snapshot handed to scripts.

use crate::request::HttpRequest;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// The request as a script sees it.
///
/// Headers are flattened into a map (lowercase names, repeated values
/// joined with `", "`) on first access and cached for the lifetime of the
/// request, as is the JSON view handed to script engines.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    request: Arc<HttpRequest>,
    path_params: HashMap<String, String>,
    headers: OnceCell<HashMap<String, String>>,
    json: OnceCell<Value>,
}

impl ExecutionContext {
    pub fn new(request: Arc<HttpRequest>, path_params: HashMap<String, String>) -> Self {
        Self {
            request,
            path_params,
            headers: OnceCell::new(),
            json: OnceCell::new(),
        }
    }

    pub fn method(&self) -> &str {
        self.request.method().as_str()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn uri(&self) -> String {
        self.request.uri().to_string()
    }

    /// Body as text; invalid UTF-8 is replaced.
    pub fn body(&self) -> String {
        String::from_utf8_lossy(self.request.body()).into_owned()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        self.headers.get_or_init(|| {
            let mut headers: HashMap<String, String> = HashMap::new();
            for (name, value) in self.request.headers() {
                let Ok(value) = value.to_str() else {
                    continue;
                };
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing| {
                        existing.push_str(", ");
                        existing.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
            headers
        })
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        self.request.query_params()
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    pub fn request(&self) -> &Arc<HttpRequest> {
        &self.request
    }

    /// `{ method, path, uri, body, headers, query, pathParams }`
    pub fn to_json(&self) -> &Value {
        self.json.get_or_init(|| {
            json!({
                "method": self.method(),
                "path": self.path(),
                "uri": self.uri(),
                "body": self.body(),
                "headers": self.headers(),
                "query": self.query_params(),
                "pathParams": self.path_params(),
            })
        })
    }
}
