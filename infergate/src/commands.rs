//! Subcommand implementations

use std::io::Write;
use std::time::Duration;

use infergate_config::{Config, ConfigManager};
use infergate_proxy::{Mode, Server};
use infergate_store::CacheStore;
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::args::{CacheCommand, ConfigCommand, TestGateArgs, TestUpstreamArgs};

/// Run the gate in record-and-replay mode
pub async fn start(config: Config) -> anyhow::Result<()> {
    println!("Starting InferenceGate in record-and-replay mode");
    println!("  Proxy: http://{}:{}", config.host, config.port);
    println!("  Upstream: {}", config.upstream);
    println!("  Cache dir: {}", config.cache_dir.display());

    run_server(config, Mode::RecordAndReplay).await
}

/// Run the gate in replay-only mode
pub async fn replay(config: Config) -> anyhow::Result<()> {
    println!("Starting InferenceGate in replay-only mode");
    println!("  Proxy: http://{}:{}", config.host, config.port);
    println!("  Cache dir: {}", config.cache_dir.display());

    run_server(config, Mode::ReplayOnly).await
}

async fn run_server(config: Config, mode: Mode) -> anyhow::Result<()> {
    let server = Server::new(&config, mode)?;

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_clone.cancel();
    });

    server.serve(shutdown).await?;
    tracing::info!("infergate stopped");
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}

/// Cache management subcommands
pub async fn cache(config: &Config, command: CacheCommand) -> anyhow::Result<()> {
    match command {
        CacheCommand::List { cache_dir } => {
            let store = CacheStore::open(cache_dir.unwrap_or_else(|| config.cache_dir.clone()))?;
            let entries = store.list().await?;

            if entries.is_empty() {
                println!("No cached entries found.");
                return Ok(());
            }

            println!("Found {} cached entries:\n", entries.len());
            for entry in entries {
                println!("  [{}]", entry.id);
                println!("    Path: {} {}", entry.method, entry.path);
                if let Some(model) = &entry.model {
                    println!("    Model: {model}");
                }
                if let Some(temperature) = entry.temperature {
                    println!("    Temperature: {temperature}");
                }
                println!("    Streaming: {}", entry.is_streaming);
                println!();
            }
        }
        CacheCommand::Info { cache_dir } => {
            let dir = cache_dir.unwrap_or_else(|| config.cache_dir.clone());
            let store = CacheStore::open(&dir)?;
            let stats = store.stats().await?;

            println!("Cache directory: {}", dir.display());
            println!("Total entries: {}", stats.total_entries);
            println!("Total size: {} bytes", stats.total_size_bytes);
            println!("Streaming responses: {}", stats.streaming_responses);
            if !stats.entries_by_model.is_empty() {
                println!("Models:");
                for (model, count) in &stats.entries_by_model {
                    println!("  {model}: {count}");
                }
            }
        }
        CacheCommand::Clear { cache_dir, yes } => {
            let store = CacheStore::open(cache_dir.unwrap_or_else(|| config.cache_dir.clone()))?;
            let count = store.list().await?.len();

            if count == 0 {
                println!("No cached entries to clear.");
                return Ok(());
            }

            if !yes && !confirm(&format!("Are you sure you want to clear {count} cached entries?"))? {
                println!("Aborted.");
                return Ok(());
            }

            let cleared = store.clear().await?;
            println!("Cleared {cleared} cached entries.");
        }
    }
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Configuration management subcommands
pub fn config(config: &Config, manager: &ConfigManager, command: &ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("Configuration file: {}", manager.path().display());
            println!("File exists: {}", manager.exists());
            println!();
            println!("Current settings:");
            println!("  host: {}", config.host);
            println!("  port: {}", config.port);
            println!("  upstream: {}", config.upstream);
            println!("  api_key: {}", redact_key(config));
            println!("  cache_dir: {}", config.cache_dir.display());
            println!("  verbose: {}", config.verbose);
            println!("  test_model: {}", config.test_model);
            if config.test_prompt.len() > 50 {
                println!("  test_prompt: {}...", &config.test_prompt[..50]);
            } else {
                println!("  test_prompt: {}", config.test_prompt);
            }
        }
        ConfigCommand::Init { force } => {
            if manager.exists() && !force {
                println!("Configuration file already exists at {}", manager.path().display());
                println!("Use --force to overwrite.");
                return Ok(());
            }

            manager.create_default()?;
            println!("Created default configuration file at {}", manager.path().display());
            println!();
            println!("Edit this file to customize your settings.");
            println!("You can also set OPENAI_API_KEY environment variable for the API key.");
        }
        ConfigCommand::Path => println!("{}", manager.path().display()),
    }
    Ok(())
}

fn redact_key(config: &Config) -> String {
    match &config.api_key {
        Some(key) => {
            let exposed = key.expose_secret();
            if exposed.len() > 4 {
                format!("***{}", &exposed[exposed.len() - 4..])
            } else {
                "***".to_owned()
            }
        }
        None => "(not set)".to_owned(),
    }
}

/// Send the configured test prompt through a running gate instance
pub async fn test_gate(config: &Config, test_args: TestGateArgs) -> anyhow::Result<()> {
    let host = test_args.host.unwrap_or_else(|| config.host.clone());
    let port = test_args.port.unwrap_or(config.port);
    let model = test_args.model.unwrap_or_else(|| config.test_model.clone());
    let prompt = test_args.prompt.unwrap_or_else(|| config.test_prompt.clone());

    let url = format!("http://{host}:{port}/v1/chat/completions");

    println!("Testing InferenceGate at http://{host}:{port}...");
    println!("Using model: {model}");

    // The running instance already carries the API key
    let result = send_test_prompt(&url, None, &model, &prompt).await;
    report_test_result(result)
}

/// Send the configured test prompt directly to the upstream API
pub async fn test_upstream(config: &Config, test_args: TestUpstreamArgs) -> anyhow::Result<()> {
    let upstream = test_args.upstream.unwrap_or_else(|| config.upstream.clone());
    let model = test_args.model.unwrap_or_else(|| config.test_model.clone());
    let prompt = test_args.prompt.unwrap_or_else(|| config.test_prompt.clone());

    let api_key = test_args
        .api_key
        .or_else(|| config.api_key.as_ref().map(|key| key.expose_secret().to_owned()));
    let Some(api_key) = api_key else {
        anyhow::bail!(
            "no API key provided; set OPENAI_API_KEY, use --api-key, or configure it in the config file"
        );
    };

    let url = format!("{}/v1/chat/completions", upstream.as_str().trim_end_matches('/'));

    println!("Testing upstream API at {upstream}...");
    println!("Using model: {model}");

    let result = send_test_prompt(&url, Some(&api_key), &model, &prompt).await;
    report_test_result(result)
}

async fn send_test_prompt(url: &str, api_key: Option<&str>, model: &str, prompt: &str) -> anyhow::Result<String> {
    let payload = serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
        "max_tokens": 50,
    });

    let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
    let mut builder = client.post(url).json(&payload);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("connection error: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("HTTP {status}: {body}");
    }

    let body: Value = response.json().await?;
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(|content| content.trim().to_owned())
        .ok_or_else(|| anyhow::anyhow!("unexpected response format: {body}"))
}

fn report_test_result(result: anyhow::Result<String>) -> anyhow::Result<()> {
    match result {
        Ok(content) => {
            println!("\nResponse: {content}");
            if content.trim().trim_end_matches('.').eq_ignore_ascii_case("ok") {
                println!("\n[SUCCESS] Test passed!");
            } else {
                println!("\n[WARNING] Received a response, but with unexpected content.");
                println!("The endpoint is reachable but the model did not follow the test prompt exactly.");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("\n[FAILED] {e}");
            std::process::exit(1);
        }
    }
}
