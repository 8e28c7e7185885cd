use bytes::Bytes;
use infergate_store::{CanonicalBody, CanonicalRequest};
use serde_json::Value;

/// An incoming client request, decomposed for routing
///
/// Headers keep arrival order and original casing; canonicalization for
/// fingerprinting happens in [`Self::canonicalize`].
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    /// Raw URL path as received (percent-escapes intact)
    pub path: String,
    /// Query parameters in arrival order
    pub query: Vec<(String, String)>,
    /// All request headers
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Bytes,
}

impl ProxyRequest {
    /// Normalized view of this request for fingerprinting
    pub fn canonicalize(&self) -> CanonicalRequest {
        CanonicalRequest::new(
            &self.method,
            &self.path,
            self.query.clone(),
            self.headers.iter().map(|(name, value)| (name.as_str(), value.as_str())),
            &self.body,
        )
    }

    /// Whether the body asks the upstream for a streaming response
    pub fn wants_stream(&self) -> bool {
        serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|body| body.get("stream").and_then(Value::as_bool))
            .unwrap_or(false)
    }
}
