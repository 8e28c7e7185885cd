//! Request fingerprinting
//!
//! Produces a stable SHA-256 digest from a normalized view of an incoming
//! request, so that semantically equal requests collapse to one cache entry
//! regardless of client serialization quirks (JSON key order, header casing,
//! percent-encoding) or credentials.

use std::collections::BTreeMap;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Headers that participate in the fingerprint
///
/// Everything else — notably `authorization`, `user-agent`, `host`, request
/// ids, dates, encodings and hop-by-hop headers — is excluded, so the same
/// recording serves clients carrying different API keys.
const FINGERPRINT_HEADERS: &[&str] = &["content-type"];

/// Separator between digest input sections
const SECTION_SEP: [u8; 1] = [0x1f];

/// Request body after canonicalization
#[derive(Debug, Clone)]
pub enum CanonicalBody {
    /// Parsed JSON structure, hashed in key-sorted canonical form
    Json(Value),
    /// Opaque bytes, hashed verbatim
    Raw(Bytes),
}

/// Normalized view of an incoming request, ready for fingerprinting
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    /// Method, uppercased
    pub method: String,
    /// Path with percent-escapes decoded and no trailing slash unless root
    pub path: String,
    /// Query parameters sorted by name; repeated names keep arrival order
    pub query: Vec<(String, String)>,
    /// Allow-listed headers, lowercased names, trimmed values
    pub headers: BTreeMap<String, String>,
    pub body: CanonicalBody,
}

/// Result of fingerprinting a request
#[derive(Debug, Clone)]
pub struct Fingerprint {
    /// Digest over the full canonical request; the storage key
    pub id: String,
    /// Digest over just the prompt, absent when the body carries none
    pub prompt_hash: Option<String>,
    /// `model` field of the request body, when present
    pub model: Option<String>,
    /// `temperature` field of the request body, when present
    pub temperature: Option<f64>,
}

impl CanonicalRequest {
    /// Canonicalize raw request components
    ///
    /// `query` is taken in arrival order; `headers` may repeat names and use
    /// any casing. The body is parsed as JSON when the content type says so,
    /// or when no content type is present and it parses; anything else stays
    /// raw bytes. Never fails.
    pub fn new<'a>(
        method: &str,
        raw_path: &str,
        query: Vec<(String, String)>,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
        body: &[u8],
    ) -> Self {
        let mut kept = BTreeMap::new();
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            if FINGERPRINT_HEADERS.contains(&name.as_str()) {
                kept.insert(name, value.trim().to_owned());
            }
        }

        let mut query = query;
        query.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            method: method.to_ascii_uppercase(),
            path: normalize_path(raw_path),
            query,
            body: canonicalize_body(kept.get("content-type").map(String::as_str), body),
            headers: kept,
        }
    }
}

/// Compute the fingerprint of a canonicalized request
///
/// Pure and deterministic across runs and hosts; no I/O.
pub fn fingerprint(request: &CanonicalRequest) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_bytes());
    hasher.update(SECTION_SEP);
    hasher.update(request.path.as_bytes());
    hasher.update(SECTION_SEP);
    hasher.update(canonical_query(&request.query).as_bytes());
    hasher.update(SECTION_SEP);
    hasher.update(canonical_headers(&request.headers).as_bytes());
    hasher.update(SECTION_SEP);
    match &request.body {
        CanonicalBody::Json(value) => hasher.update(canonical_json(value).as_bytes()),
        CanonicalBody::Raw(bytes) => hasher.update(bytes),
    }
    let id = format!("{:x}", hasher.finalize());

    let (prompt_hash, model, temperature) = match &request.body {
        CanonicalBody::Json(value) => (
            prompt_hash(value),
            value.get("model").and_then(Value::as_str).map(str::to_owned),
            value.get("temperature").and_then(Value::as_f64),
        ),
        CanonicalBody::Raw(_) => (None, None, None),
    };

    Fingerprint {
        id,
        prompt_hash,
        model,
        temperature,
    }
}

/// Digest over just the `messages` (Chat Completions) or `input` (Responses)
/// field of the body, independent of non-prompt parameters
fn prompt_hash(body: &Value) -> Option<String> {
    let prompt = body.get("messages").or_else(|| body.get("input"))?;
    let hash = Sha256::digest(canonical_json(prompt).as_bytes());
    Some(format!("{hash:x}"))
}

/// Decode percent-escapes and trim the trailing slash unless the path is root
fn normalize_path(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let mut path = if decoded.starts_with('/') {
        decoded.into_owned()
    } else {
        format!("/{decoded}")
    };
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

/// Parse the body as JSON when the content type allows it
///
/// Falls back to raw bytes when parsing fails; a body that is not valid
/// JSON still fingerprints, just byte-exactly.
fn canonicalize_body(content_type: Option<&str>, body: &[u8]) -> CanonicalBody {
    let is_json = content_type.is_none_or(|ct| ct.split(';').next().unwrap_or(ct).trim() == "application/json");
    if is_json && !body.is_empty()
        && let Ok(value) = serde_json::from_slice::<Value>(body)
    {
        return CanonicalBody::Json(value);
    }
    CanonicalBody::Raw(Bytes::copy_from_slice(body))
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut out = String::new();
    for (i, (name, value)) in query.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}

fn canonical_headers(headers: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (i, (name, value)) in headers.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(name);
        out.push(':');
        out.push_str(value);
    }
    out
}

/// Serialize a JSON value in canonical form
///
/// Object keys are sorted recursively, arrays keep their order, numbers keep
/// their lexical form (no float round-trip), strings are escaped the standard
/// serde way.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&serde_json::to_string(s).unwrap_or_default()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                if let Some(item) = map.get(key) {
                    write_canonical(item, out);
                }
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_request(body: &[u8], extra_headers: &[(&str, &str)]) -> CanonicalRequest {
        let mut headers = vec![("content-type", "application/json")];
        headers.extend_from_slice(extra_headers);
        CanonicalRequest::new("POST", "/v1/chat/completions", Vec::new(), headers, body)
    }

    #[test]
    fn deterministic_across_calls() {
        let body = br#"{"model":"gpt-4","messages":[{"role":"user","content":"Hi"}]}"#;
        let a = fingerprint(&chat_request(body, &[]));
        let b = fingerprint(&chat_request(body, &[]));
        assert_eq!(a.id, b.id);
        assert_eq!(a.prompt_hash, b.prompt_hash);
    }

    #[test]
    fn json_key_order_is_irrelevant() {
        let a = chat_request(br#"{"model":"gpt-4","temperature":0.7,"messages":[]}"#, &[]);
        let b = chat_request(br#"{"temperature":0.7,"messages":[],"model":"gpt-4"}"#, &[]);
        assert_eq!(fingerprint(&a).id, fingerprint(&b).id);
    }

    #[test]
    fn excluded_headers_do_not_affect_id() {
        let body = br#"{"model":"gpt-4","messages":[]}"#;
        let bare = chat_request(body, &[]);
        let noisy = chat_request(
            body,
            &[
                ("Authorization", "Bearer sk-one"),
                ("User-Agent", "curl/8.0"),
                ("Host", "localhost:8080"),
                ("Accept-Encoding", "gzip"),
                ("X-Request-Id", "abc123"),
            ],
        );
        assert_eq!(fingerprint(&bare).id, fingerprint(&noisy).id);
    }

    #[test]
    fn header_casing_is_irrelevant() {
        let body = br#"{"model":"gpt-4"}"#;
        let lower = CanonicalRequest::new("POST", "/v1/x", Vec::new(), [("content-type", "application/json")], body);
        let upper = CanonicalRequest::new("POST", "/v1/x", Vec::new(), [("Content-Type", "application/json")], body);
        assert_eq!(fingerprint(&lower).id, fingerprint(&upper).id);
    }

    #[test]
    fn method_path_query_and_body_distinguish() {
        let body = br#"{"model":"gpt-4"}"#;
        let base = fingerprint(&chat_request(body, &[])).id;

        let get = CanonicalRequest::new(
            "GET",
            "/v1/chat/completions",
            Vec::new(),
            [("content-type", "application/json")],
            body,
        );
        assert_ne!(fingerprint(&get).id, base);

        let other_path = CanonicalRequest::new(
            "POST",
            "/v1/responses",
            Vec::new(),
            [("content-type", "application/json")],
            body,
        );
        assert_ne!(fingerprint(&other_path).id, base);

        let with_query = CanonicalRequest::new(
            "POST",
            "/v1/chat/completions",
            vec![("beta".to_owned(), "1".to_owned())],
            [("content-type", "application/json")],
            body,
        );
        assert_ne!(fingerprint(&with_query).id, base);

        let other_body = fingerprint(&chat_request(br#"{"model":"gpt-4o"}"#, &[])).id;
        assert_ne!(other_body, base);
    }

    #[test]
    fn content_type_distinguishes() {
        let body = br"model=gpt-4";
        let json = CanonicalRequest::new("POST", "/v1/x", Vec::new(), [("content-type", "application/json")], body);
        let form = CanonicalRequest::new(
            "POST",
            "/v1/x",
            Vec::new(),
            [("content-type", "application/x-www-form-urlencoded")],
            body,
        );
        assert_ne!(fingerprint(&json).id, fingerprint(&form).id);
    }

    #[test]
    fn stream_flag_distinguishes() {
        let streaming = chat_request(br#"{"model":"gpt-4","messages":[],"stream":true}"#, &[]);
        let buffered = chat_request(br#"{"model":"gpt-4","messages":[],"stream":false}"#, &[]);
        assert_ne!(fingerprint(&streaming).id, fingerprint(&buffered).id);
    }

    #[test]
    fn query_names_sorted_values_keep_order() {
        let a = CanonicalRequest::new(
            "GET",
            "/v1/models",
            vec![
                ("b".to_owned(), "2".to_owned()),
                ("a".to_owned(), "1".to_owned()),
            ],
            [],
            b"",
        );
        let b = CanonicalRequest::new(
            "GET",
            "/v1/models",
            vec![
                ("a".to_owned(), "1".to_owned()),
                ("b".to_owned(), "2".to_owned()),
            ],
            [],
            b"",
        );
        assert_eq!(fingerprint(&a).id, fingerprint(&b).id);

        // Repeated names keep arrival order
        let c = CanonicalRequest::new(
            "GET",
            "/v1/models",
            vec![
                ("a".to_owned(), "1".to_owned()),
                ("a".to_owned(), "2".to_owned()),
            ],
            [],
            b"",
        );
        let d = CanonicalRequest::new(
            "GET",
            "/v1/models",
            vec![
                ("a".to_owned(), "2".to_owned()),
                ("a".to_owned(), "1".to_owned()),
            ],
            [],
            b"",
        );
        assert_ne!(fingerprint(&c).id, fingerprint(&d).id);
    }

    #[test]
    fn path_is_normalized() {
        let trailing = CanonicalRequest::new("GET", "/v1/models/", Vec::new(), [], b"");
        let plain = CanonicalRequest::new("GET", "/v1/models", Vec::new(), [], b"");
        assert_eq!(fingerprint(&trailing).id, fingerprint(&plain).id);

        let escaped = CanonicalRequest::new("GET", "/v1/models%2Fgpt-4", Vec::new(), [], b"");
        let decoded = CanonicalRequest::new("GET", "/v1/models/gpt-4", Vec::new(), [], b"");
        assert_eq!(fingerprint(&escaped).id, fingerprint(&decoded).id);

        let root = CanonicalRequest::new("GET", "/", Vec::new(), [], b"");
        assert_eq!(root.path, "/");
    }

    #[test]
    fn invalid_json_falls_back_to_raw() {
        let request = chat_request(b"not json at all", &[]);
        assert!(matches!(request.body, CanonicalBody::Raw(_)));
        // Still fingerprints, and differently from a correction of the body
        let other = chat_request(b"not json at ALL", &[]);
        assert_ne!(fingerprint(&request).id, fingerprint(&other).id);
    }

    #[test]
    fn missing_content_type_with_json_body_parses() {
        let request = CanonicalRequest::new("POST", "/v1/x", Vec::new(), [], br#"{"model":"gpt-4"}"#);
        assert!(matches!(request.body, CanonicalBody::Json(_)));
    }

    #[test]
    fn prompt_hash_ignores_non_prompt_params() {
        let a = fingerprint(&chat_request(
            br#"{"model":"gpt-4","temperature":0.2,"messages":[{"role":"user","content":"Hi"}]}"#,
            &[],
        ));
        let b = fingerprint(&chat_request(
            br#"{"model":"gpt-3.5","temperature":0.9,"messages":[{"role":"user","content":"Hi"}]}"#,
            &[],
        ));
        assert_ne!(a.id, b.id);
        assert_eq!(a.prompt_hash, b.prompt_hash);
        assert!(a.prompt_hash.is_some());
    }

    #[test]
    fn prompt_hash_covers_responses_input() {
        let fp = fingerprint(&chat_request(br#"{"model":"gpt-4","input":"Hello"}"#, &[]));
        assert!(fp.prompt_hash.is_some());

        let none = fingerprint(&chat_request(br#"{"model":"gpt-4"}"#, &[]));
        assert!(none.prompt_hash.is_none());
    }

    #[test]
    fn metadata_extraction() {
        let fp = fingerprint(&chat_request(
            br#"{"model":"gpt-4","temperature":0.5,"messages":[]}"#,
            &[],
        ));
        assert_eq!(fp.model.as_deref(), Some("gpt-4"));
        assert_eq!(fp.temperature, Some(0.5));
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value: Value = serde_json::from_str(r#"{"b":{"d":1,"c":[2,1]},"a":"x"}"#).unwrap();
        assert_eq!(canonical_json(&value), r#"{"a":"x","b":{"c":[2,1],"d":1}}"#);
    }

    #[test]
    fn canonical_json_preserves_number_lexemes() {
        let value: Value = serde_json::from_str(r#"{"t":0.70,"n":1e3}"#).unwrap();
        let canonical = canonical_json(&value);
        assert!(canonical.contains("0.70"), "got {canonical}");
        assert!(canonical.contains("1e3"), "got {canonical}");
    }
}
