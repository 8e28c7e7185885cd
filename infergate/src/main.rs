#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;
mod commands;

use args::{Cli, Command};
use clap::Parser;
use infergate_config::ConfigManager;
use secrecy::SecretString;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::new(cli.config.clone());
    let mut config = manager.load()?;
    if cli.verbose {
        config.verbose = true;
    }

    init_logging(config.verbose);

    match cli.command {
        Command::Start(serve_args) => {
            apply_serve_overrides(&mut config, &serve_args);
            commands::start(config).await
        }
        Command::Replay(replay_args) => {
            if let Some(host) = replay_args.host {
                config.host = host;
            }
            if let Some(port) = replay_args.port {
                config.port = port;
            }
            if let Some(cache_dir) = replay_args.cache_dir {
                config.cache_dir = cache_dir;
            }
            commands::replay(config).await
        }
        Command::Cache { command } => commands::cache(&config, command).await,
        Command::Config { command } => commands::config(&config, &manager, &command),
        Command::TestGate(test_args) => commands::test_gate(&config, test_args).await,
        Command::TestUpstream(test_args) => commands::test_upstream(&config, test_args).await,
    }
}

/// Overlay CLI options onto the loaded configuration
///
/// Precedence is defaults < config file < environment < CLI; the loader
/// already applied the first three.
fn apply_serve_overrides(config: &mut infergate_config::Config, serve_args: &args::ServeArgs) {
    if let Some(host) = &serve_args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = serve_args.port {
        config.port = port;
    }
    if let Some(cache_dir) = &serve_args.cache_dir {
        config.cache_dir.clone_from(cache_dir);
    }
    if let Some(upstream) = &serve_args.upstream {
        config.upstream.clone_from(upstream);
    }
    if let Some(api_key) = &serve_args.api_key {
        config.api_key = Some(SecretString::from(api_key.clone()));
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
