#![allow(clippy::must_use_candidate)]

mod loader;

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

pub use loader::ConfigManager;

/// Default upstream OpenAI API base URL
const DEFAULT_UPSTREAM: &str = "https://api.openai.com";

/// Default prompt for the connectivity test commands
const DEFAULT_TEST_PROMPT: &str = "This is a test prompt. Reply with **ONLY** \"OK.\" to confirm \
                                   that everything is ok. DO NOT output anything else.";

/// Top-level InferenceGate configuration
///
/// Loaded from a YAML file via [`ConfigManager`]. The `api_key` field is
/// deserialized but never written back to disk.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host to bind the proxy server to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream OpenAI-compatible API base URL
    #[serde(default = "default_upstream")]
    pub upstream: Url,
    /// Upstream API key; `OPENAI_API_KEY` always wins over the file value
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    /// Directory holding recorded entries
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Enable debug-level logging
    #[serde(default)]
    pub verbose: bool,
    /// Model used by `test-gate` / `test-upstream`
    #[serde(default = "default_test_model")]
    pub test_model: String,
    /// Prompt used by `test-gate` / `test-upstream`
    #[serde(default = "default_test_prompt")]
    pub test_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upstream: default_upstream(),
            api_key: None,
            cache_dir: default_cache_dir(),
            verbose: false,
            test_model: default_test_model(),
            test_prompt: default_test_prompt(),
        }
    }
}

impl Config {
    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream URL is not plain HTTP(S)
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.upstream.scheme(), "http" | "https") {
            anyhow::bail!("upstream must be an http or https URL, got `{}`", self.upstream);
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_port() -> u16 {
    8080
}

/// # Panics
///
/// Panics if the hardcoded default base URL is invalid (should never happen).
fn default_upstream() -> Url {
    Url::parse(DEFAULT_UPSTREAM).expect("valid default URL")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".inference_cache")
}

fn default_test_model() -> String {
    "gpt-4o-mini".to_owned()
}

fn default_test_prompt() -> String {
    DEFAULT_TEST_PROMPT.to_owned()
}
