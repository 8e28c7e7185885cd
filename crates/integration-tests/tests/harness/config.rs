//! Programmatic configuration for integration tests

use std::path::Path;

use infergate_config::Config;
use secrecy::SecretString;
use url::Url;

/// Minimal gate configuration pointed at a mock upstream
pub fn test_config(upstream_url: &str, cache_dir: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_owned(),
        port: 0,
        upstream: Url::parse(upstream_url).expect("valid upstream URL"),
        api_key: Some(SecretString::from("test-key")),
        cache_dir: cache_dir.to_path_buf(),
        ..Config::default()
    }
}
