use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::Config;

/// Directory under the user's home holding the default config file
const CONFIG_DIR: &str = ".infergate";
/// Default config file name
const CONFIG_FILE: &str = "config.yaml";

/// Loads and saves InferenceGate configuration
///
/// The default location is `$HOME/.infergate/config.yaml`
/// (`%USERPROFILE%` on Windows); a custom path may be supplied via
/// `--config`.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Create a manager for the given path, or the default location
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(Self::default_path),
        }
    }

    /// The default configuration file path
    pub fn default_path() -> PathBuf {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        home.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Path of the configuration file this manager reads and writes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the configuration file exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load configuration
    ///
    /// A missing file yields defaults, which are then written out so the
    /// user has a file to edit. The `OPENAI_API_KEY` environment variable
    /// always overrides the file value.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, YAML parsing fails,
    /// validation fails, or the initial file cannot be written
    pub fn load(&self) -> anyhow::Result<Config> {
        let existed = self.path.exists();

        let mut config: Config = if existed {
            let raw = std::fs::read_to_string(&self.path)
                .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", self.path.display()))?;
            serde_yaml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", self.path.display()))?
        } else {
            Config::default()
        };

        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.is_empty()
        {
            config.api_key = Some(SecretString::from(key));
        }

        config.validate()?;

        if !existed {
            self.save(&config)?;
        }

        Ok(config)
    }

    /// Write the configuration to disk
    ///
    /// The API key is never persisted; the serialized form omits it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written
    pub fn save(&self, config: &Config) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("failed to create config dir {}: {e}", parent.display()))?;
        }

        let yaml = serde_yaml::to_string(config).map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;
        std::fs::write(&self.path, yaml)
            .map_err(|e| anyhow::anyhow!("failed to write config file {}: {e}", self.path.display()))?;

        Ok(())
    }

    /// Create and save a default configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn create_default(&self) -> anyhow::Result<Config> {
        let config = Config::default();
        self.save(&config)?;
        Ok(config)
    }
}
