use bytes::Bytes;
use http_body_util::Full;
use hyper::header::CONTENT_TYPE;
use hyper::http::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use std::str::FromStr;
use tracing::warn;

/// A response under construction. Fallback senders receive it mutably.
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    body: Option<Bytes>,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        ResponseBuilder {
            status,
            body: None,
            headers: Default::default(),
        }
    }

    /// `{"error": message}` with a JSON content type.
    pub fn json_error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::new(status)
            .header(CONTENT_TYPE.as_str(), "application/json")
            .body(body)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Replace any existing value; invalid names or values are skipped.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!("Skipping invalid response header {}: {}", name, value),
        }
    }

    /// Set only when no value is present yet.
    pub fn set_header_if_absent(&mut self, name: &str, value: &str) {
        if !self.has_header(name) {
            self.set_header(name, value);
        }
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn merge_headers<'a, H>(&mut self, headers: H)
    where
        H: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (name, value) in headers {
            self.set_header(name, value);
        }
    }

    pub fn build_full(self) -> Response<Full<Bytes>> {
        let payload = self.body.unwrap_or_default();
        let mut response = Response::new(Full::new(payload));
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::collections::HashMap;

    #[test]
    fn test_builder_with_status() {
        let response = ResponseBuilder::new(StatusCode::ACCEPTED).build_full();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_builder_with_headers() {
        let response = ResponseBuilder::new(StatusCode::OK)
            .header("X-Custom-Header", "test-value")
            .header("Content-Type", "application/json")
            .build_full();

        assert_eq!(
            response.headers().get("X-Custom-Header"),
            Some(&HeaderValue::from_static("test-value"))
        );
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let builder = ResponseBuilder::new(StatusCode::OK).header("bad header", "x");
        assert!(builder.headers().is_empty());
    }

    #[test]
    fn test_set_header_if_absent_is_case_insensitive() {
        let mut builder = ResponseBuilder::new(StatusCode::OK);
        builder.merge_headers(&HashMap::from([(
            "content-type".to_string(),
            "text/plain".to_string(),
        )]));
        builder.set_header_if_absent("Content-Type", "application/json");
        assert_eq!(
            builder.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain"))
        );
    }

    #[tokio::test]
    async fn test_json_error() {
        let response =
            ResponseBuilder::json_error(StatusCode::NOT_FOUND, "No resource for GET /x")
                .build_full();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"error":"No resource for GET /x"}"#);
    }
}
