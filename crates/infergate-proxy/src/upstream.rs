//! Upstream forwarding client
//!
//! The [`Upstream`] trait is the seam between the routing core and the real
//! inference API; [`HttpUpstream`] is the reqwest-backed implementation.
//! Transport failure (no status line received) is signalled distinctly from
//! an HTTP error status — the latter is a recordable response.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::request::ProxyRequest;

/// Request headers never forwarded upstream
///
/// `accept-encoding` is stripped so the upstream responds with identity
/// encoding; recorded bodies must replay to clients regardless of what
/// encodings they negotiate.
const SKIP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "accept-encoding",
];

/// Response headers not carried into recordings
const SKIP_RESPONSE_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "connection",
    "content-encoding",
    "keep-alive",
    "trailer",
    "upgrade",
];

/// Errors from the upstream client
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Request never produced a status line
    #[error("transport failure: {0}")]
    Transport(String),

    /// Response stream broke after the status line
    #[error("stream interrupted: {0}")]
    Stream(String),
}

/// Body of an upstream response
pub enum UpstreamBody {
    /// Fully buffered body
    Buffered(Bytes),
    /// Chunks in arrival order, boundaries exactly as delivered
    Stream(Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>),
}

/// A response received from the upstream API
pub struct UpstreamResponse {
    pub status: u16,
    /// Lowercased header names; hop-by-hop headers removed
    pub headers: BTreeMap<String, String>,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, UpstreamBody::Stream(_))
    }
}

/// Forwards requests to the real inference API
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward a request and return the response or a transport failure
    async fn forward(&self, request: &ProxyRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Reqwest-backed upstream client
pub struct HttpUpstream {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl HttpUpstream {
    /// Create a client for the given upstream base URL
    ///
    /// When `api_key` is set it replaces whatever `authorization` header the
    /// client sent.
    pub fn new(base_url: Url, api_key: Option<SecretString>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    fn request_url(&self, request: &ProxyRequest) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}{}", request.path)
    }

    /// Headers for the outbound request, hop-by-hop headers dropped
    ///
    /// When an API key is configured, the client's `authorization` header is
    /// removed here; `bearer_auth` appends rather than replaces, and the
    /// upstream must see exactly one credential.
    fn build_headers(&self, request: &ProxyRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if SKIP_REQUEST_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        if self.api_key.is_some() {
            headers.remove(reqwest::header::AUTHORIZATION);
        }
        headers
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: &ProxyRequest) -> Result<UpstreamResponse, UpstreamError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| UpstreamError::Transport(format!("invalid method: {e}")))?;

        let mut builder = self
            .client
            .request(method, self.request_url(request))
            .headers(self.build_headers(request))
            .body(request.body.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "upstream request failed");
            UpstreamError::Transport(e.to_string())
        })?;

        let status = response.status().as_u16();
        let headers = collect_response_headers(response.headers());

        let streaming = headers
            .get("content-type")
            .is_some_and(|ct| ct.starts_with("text/event-stream"))
            || (request.wants_stream() && was_chunked(response.headers()));

        let body = if streaming {
            let chunks = response
                .bytes_stream()
                .map(|item| item.map_err(|e| UpstreamError::Stream(e.to_string())));
            UpstreamBody::Stream(Box::pin(chunks))
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| UpstreamError::Transport(format!("failed to read response body: {e}")))?;
            UpstreamBody::Buffered(bytes)
        };

        Ok(UpstreamResponse { status, headers, body })
    }
}

fn was_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(reqwest::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
}

fn collect_response_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !SKIP_RESPONSE_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
