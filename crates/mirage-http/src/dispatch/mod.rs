//! Writes a resolved [`ResponseBehaviour`] out as an HTTP response.
//!
//! Body precedence: response file, then inline data, then the fallback
//! senders in order.

mod builder;

pub use builder::ResponseBuilder;

use crate::behaviour::ResponseBehaviour;
use crate::config::ResourceDefinition;
use crate::request::HttpRequest;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No sender could render a response for {0}")]
    Unrenderable(String),
    #[error("Failed to read response file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid status code {0}")]
    InvalidStatus(u16),
}

/// Last-resort body writer, tried when neither a file nor data is set.
///
/// Returns `Ok(true)` when it handled the response. Errors are logged and
/// the next sender is tried.
pub trait FallbackSender: Send + Sync {
    fn name(&self) -> &str;

    fn send(
        &self,
        request: &HttpRequest,
        behaviour: &ResponseBehaviour,
        response: &mut ResponseBuilder,
    ) -> anyhow::Result<bool>;
}

/// Answers with an empty body.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyResponseSender;

impl FallbackSender for EmptyResponseSender {
    fn name(&self) -> &str {
        "empty"
    }

    fn send(
        &self,
        _request: &HttpRequest,
        _behaviour: &ResponseBehaviour,
        response: &mut ResponseBuilder,
    ) -> anyhow::Result<bool> {
        response.set_body(Bytes::new());
        Ok(true)
    }
}

pub struct ResponseDispatcher {
    fallbacks: Vec<Arc<dyn FallbackSender>>,
}

impl Default for ResponseDispatcher {
    fn default() -> Self {
        let empty: Arc<dyn FallbackSender> = Arc::new(EmptyResponseSender);
        Self::new(vec![empty])
    }
}

impl ResponseDispatcher {
    /// Use exactly `fallbacks`, in order.
    pub fn new(fallbacks: Vec<Arc<dyn FallbackSender>>) -> Self {
        Self { fallbacks }
    }

    pub fn fallbacks(&self) -> &[Arc<dyn FallbackSender>] {
        &self.fallbacks
    }

    /// Build the response. Any configured delay elapses before the body is read.
    ///
    /// Relative response files resolve against `config_dir`.
    pub async fn send(
        &self,
        definition: &ResourceDefinition,
        config_dir: &Path,
        request: &HttpRequest,
        behaviour: &ResponseBehaviour,
    ) -> Result<Response<Full<Bytes>>, DispatchError> {
        if let Some(simulation) = behaviour.performance_simulation() {
            let delay = simulation.delay();
            debug!("Delaying response to {} by {:?}", request, delay);
            tokio::time::sleep(delay).await;
        }

        let status = match behaviour.status_code() {
            0 => StatusCode::OK,
            code => StatusCode::from_u16(code).map_err(|_| DispatchError::InvalidStatus(code))?,
        };
        let mut response = ResponseBuilder::new(status);
        response.merge_headers(behaviour.response_headers());

        if let Some(file) = behaviour.response_file().filter(|f| !f.trim().is_empty()) {
            let path = resolve_path(config_dir, file);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| DispatchError::File {
                    path: path.clone(),
                    source,
                })?;
            let content_type = definition
                .response
                .content_type
                .as_deref()
                .unwrap_or_else(|| content_type_for(&path));
            response.set_header_if_absent(CONTENT_TYPE.as_str(), content_type);
            response.set_body(bytes);
            debug!("Serving {} for {}", path.display(), request);
            return Ok(response.build_full());
        }

        if let Some(data) = behaviour.response_data().filter(|d| !d.trim().is_empty()) {
            let content_type = definition
                .response
                .content_type
                .as_deref()
                .unwrap_or("application/json");
            response.set_header_if_absent(CONTENT_TYPE.as_str(), content_type);
            response.set_body(data.to_string());
            return Ok(response.build_full());
        }

        for sender in &self.fallbacks {
            match sender.send(request, behaviour, &mut response) {
                Ok(true) => {
                    debug!("Fallback sender {} handled {}", sender.name(), request);
                    return Ok(response.build_full());
                }
                Ok(false) => {}
                Err(e) => warn!("Fallback sender {} failed for {}: {}", sender.name(), request, e),
            }
        }

        Err(DispatchError::Unrenderable(request.to_string()))
    }
}

fn resolve_path(config_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_dir.join(path)
    }
}

/// Content type by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "yaml" | "yml" => "application/x-yaml",
        "js" => "application/javascript",
        "css" => "text/css",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
