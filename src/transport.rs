//! HTTP transport seam.
//!
//! `Transport` is implemented by the embedding application (or the provided
//! reqwest-backed [`HttpTransport`]). Using a trait keeps the upload engine
//! decoupled from the HTTP stack and testable with scripted mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything except RFC 3986 unreserved characters gets percent-encoded
/// in query strings.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Callback invoked with the cumulative number of request-body bytes sent.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Errors produced by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,
}

/// HTTP methods the protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

/// A request description: URL, method, headers, query parameters and body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the first query parameter with the given name.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Renders the URL with all query parameters percent-encoded and
    /// appended, respecting any query string already present in `url`.
    pub fn full_url(&self) -> String {
        let mut url = self.url.clone();
        for (name, value) in &self.query {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&utf8_percent_encode(name, QUERY_ENCODE).to_string());
            url.push('=');
            url.push_str(&utf8_percent_encode(value, QUERY_ENCODE).to_string());
        }
        url
    }
}

/// A transport-level response: status, headers and body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive response header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Abstract HTTP transport.
///
/// `send` resolves once the full response is available. In-flight requests
/// are aborted by dropping the returned future; the engine does this via
/// its cancellation token and tracked task handles.
pub trait Transport: Send + Sync {
    /// Sends a request. When `progress` is provided the transport should
    /// invoke it with cumulative body bytes as the upload proceeds; a
    /// transport that cannot observe mid-request progress may call it once
    /// with the full body length before resolving.
    fn send(
        &self,
        request: HttpRequest,
        progress: Option<ProgressFn>,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + '_>>;
}

/// Slice size for streaming request bodies so progress callbacks fire as
/// bytes go out.
const BODY_SLICE: usize = 64 * 1024;

/// reqwest-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing client (custom timeouts, proxies, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: HttpRequest,
        progress: Option<ProgressFn>,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + '_>> {
        Box::pin(async move {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Put => reqwest::Method::PUT,
                Method::Post => reqwest::Method::POST,
            };

            let mut builder = self.client.request(method, request.full_url());
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            if let Some(body) = request.body {
                builder = builder.header("Content-Length", body.len().to_string());
                if let Some(progress) = progress {
                    // Stream the body in slices so the callback observes
                    // bytes as they are handed to the connection.
                    let slices: Vec<Vec<u8>> =
                        body.chunks(BODY_SLICE).map(<[u8]>::to_vec).collect();
                    let mut sent = 0u64;
                    let stream = futures_util::stream::iter(slices).map(move |slice| {
                        sent += slice.len() as u64;
                        progress(sent);
                        Ok::<Vec<u8>, std::io::Error>(slice)
                    });
                    builder = builder.body(reqwest::Body::wrap_stream(stream));
                } else {
                    builder = builder.body(body);
                }
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?
                .to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url_appends_encoded_query() {
        let req = HttpRequest::new(Method::Get, "https://sign.example.com/get_init_signature")
            .query("key", "/bucket/123_a file.bin")
            .query("filesize", 42);
        assert_eq!(
            req.full_url(),
            "https://sign.example.com/get_init_signature?key=%2Fbucket%2F123_a%20file.bin&filesize=42"
        );
    }

    #[test]
    fn full_url_respects_existing_query_string() {
        let req = HttpRequest::new(Method::Post, "https://h/key?uploads").query("x", "1");
        assert_eq!(req.full_url(), "https://h/key?uploads&x=1");
    }

    #[test]
    fn response_header_lookup_is_case_insensitive() {
        let resp = HttpResponse {
            status: 200,
            headers: vec![("ETag".into(), "\"abc\"".into())],
            body: Vec::new(),
        };
        assert_eq!(resp.header("etag"), Some("\"abc\""));
        assert_eq!(resp.header("ETAG"), Some("\"abc\""));
        assert_eq!(resp.header("content-type"), None);
    }

    #[test]
    fn success_is_any_2xx() {
        for (status, ok) in [(200u16, true), (204, true), (301, false), (403, false), (500, false)] {
            let resp = HttpResponse {
                status,
                headers: Vec::new(),
                body: Vec::new(),
            };
            assert_eq!(resp.is_success(), ok, "status {status}");
        }
    }
}
