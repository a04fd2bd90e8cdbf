//! Incoming request snapshot shared by every pipeline stage.

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, Uri};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;

/// A fully-read HTTP request.
///
/// Query parameters are parsed on first access and cached for the
/// lifetime of the request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    query_params: OnceCell<HashMap<String, String>>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            query_params: OnceCell::new(),
        }
    }

    pub fn from_parts(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            query_params: OnceCell::new(),
        }
    }

    /// Add a header; invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Case-insensitive header lookup; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decoded query parameters; the last occurrence of a repeated name wins.
    pub fn query_params(&self) -> &HashMap<String, String> {
        self.query_params
            .get_or_init(|| parse_query_string(self.uri.query().unwrap_or("")))
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params().get(name).map(String::as_str)
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

/// Parse `a=1&b=two%20words` into a map, URL-decoding keys and values.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decoded_key = urlencoding::decode(&key.replace('+', " "))
                .map(|k| k.into_owned())
                .unwrap_or_else(|_| key.to_string());
            let decoded_value = urlencoding::decode(&value.replace('+', " "))
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            (decoded_key, decoded_value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("a=1&b=two%20words&flag&c=x+y");
        assert_eq!(params.get("a"), Some(&"1".to_string()));
        assert_eq!(params.get("b"), Some(&"two words".to_string()));
        assert_eq!(params.get("flag"), Some(&"".to_string()));
        assert_eq!(params.get("c"), Some(&"x y".to_string()));
        assert!(parse_query_string("").is_empty());
    }

    #[test]
    fn test_request_accessors() {
        let request = HttpRequest::new(Method::POST, Uri::from_static("/pets?foo=bar"))
            .with_header("X-Api-Key", "k")
            .with_body("{}");

        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "/pets");
        assert_eq!(request.header("x-api-key"), Some("k"));
        assert_eq!(request.header("X-API-KEY"), Some("k"));
        assert_eq!(request.query_param("foo"), Some("bar"));
        assert_eq!(request.body().as_ref(), b"{}");
        assert_eq!(request.to_string(), "POST /pets?foo=bar");
    }

    #[test]
    fn test_query_params_are_memoized() {
        let request = HttpRequest::new(Method::GET, Uri::from_static("/a?x=1"));
        let first = request.query_params() as *const _;
        let second = request.query_params() as *const _;
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let request = HttpRequest::new(Method::GET, Uri::from_static("/"))
            .with_header("bad header", "v");
        assert!(request.headers().is_empty());
    }
}
