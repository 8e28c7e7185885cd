use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use url::Url;

/// InferenceGate CLI
#[derive(Debug, Parser)]
#[command(
    name = "infergate",
    version,
    about = "AI inference record/replay proxy for testing, debugging and development"
)]
pub struct Cli {
    /// Path to configuration file (default: $HOME/.infergate/config.yaml)
    #[arg(short = 'C', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start in record-and-replay mode: replay cached inferences, forward
    /// and record on a miss
    Start(ServeArgs),
    /// Start in replay-only mode: serve cached inferences only, never
    /// contact the upstream
    Replay(ReplayArgs),
    /// Cache management commands
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    /// Configuration management commands
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Send a test prompt through a running gate instance
    TestGate(TestGateArgs),
    /// Send a test prompt directly to the upstream API
    TestUpstream(TestUpstreamArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Host to bind the server to
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to run the server on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory to store cached responses
    #[arg(short, long)]
    pub cache_dir: Option<PathBuf>,

    /// Upstream OpenAI-compatible API base URL
    #[arg(short, long)]
    pub upstream: Option<Url>,

    /// Upstream API key
    #[arg(short = 'k', long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Host to bind the server to
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to run the server on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory where cached responses are stored
    #[arg(short, long)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List all cached entries
    List {
        /// Directory where cached responses are stored
        #[arg(short, long)]
        cache_dir: Option<PathBuf>,
    },
    /// Show cache statistics
    Info {
        /// Directory where cached responses are stored
        #[arg(short, long)]
        cache_dir: Option<PathBuf>,
    },
    /// Clear all cached entries
    Clear {
        /// Directory where cached responses are stored
        #[arg(short, long)]
        cache_dir: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Initialize a default configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },
    /// Show the path to the configuration file
    Path,
}

#[derive(Debug, Args)]
pub struct TestGateArgs {
    /// Host of the running gate instance
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port of the running gate instance
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Model to use for the test
    #[arg(short, long)]
    pub model: Option<String>,

    /// Custom prompt to send
    #[arg(long)]
    pub prompt: Option<String>,
}

#[derive(Debug, Args)]
pub struct TestUpstreamArgs {
    /// Upstream OpenAI-compatible API base URL
    #[arg(short, long)]
    pub upstream: Option<Url>,

    /// Upstream API key
    #[arg(short = 'k', long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model to use for the test
    #[arg(short, long)]
    pub model: Option<String>,

    /// Custom prompt to send
    #[arg(long)]
    pub prompt: Option<String>,
}
