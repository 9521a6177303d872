//! Configuration Manager

use super::{Config, CONFIG_VERSION};
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashSet;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory and the per-user directory
pub const CONFIG_FILE: &str = "portbridge.toml";

/// Manages configuration loading, creation, and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Resolve the config file location: the working directory first, then
    /// the per-user directory.
    pub fn config_path() -> Result<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }
        let home = dirs::home_dir().context("Failed to determine the home directory")?;
        Ok(home.join(".portbridge").join(CONFIG_FILE))
    }

    /// Load the configuration, creating it interactively on first run
    pub fn load_or_init(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Self::init_interactive(&path)
        }
    }

    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.version != CONFIG_VERSION {
            tracing::warn!(
                "Config file {} has version {}, expected {}",
                path.display(),
                config.version,
                CONFIG_VERSION
            );
        }

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Save configuration to file, creating the parent directory if needed
    pub fn save_to_file(config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        let content =
            toml::to_string_pretty(config).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// First-run setup: prompt for the server URL and key, persist them
    fn init_interactive(path: &Path) -> Result<Config> {
        println!(
            "Enter server URL. It will be saved at \"{}\".",
            path.display()
        );
        let url = Self::prompt_line()?;
        println!(
            "Enter server key. It will be saved at \"{}\".",
            path.display()
        );
        let key = Self::prompt_line()?;

        let config = Config::new(url, key);
        config
            .validate()
            .context("Configuration validation failed")?;
        Self::save_to_file(&config, path)?;
        tracing::info!("Configuration saved to {}", path.display());

        Ok(config)
    }

    fn prompt_line() -> Result<String> {
        print!("> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .context("Failed to read input")?;
        Ok(line.trim().to_string())
    }

    /// Override settings from environment variables if present
    pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
        if let Ok(url) = std::env::var("PORTBRIDGE_URL") {
            config.control.url = url;
        }

        if let Ok(key) = std::env::var("PORTBRIDGE_KEY") {
            config.control.key = key;
        }

        if let Ok(host) = std::env::var("PORTBRIDGE_LOCAL_HOST") {
            config.forward.local_host = host
                .parse::<IpAddr>()
                .with_context(|| format!("Invalid PORTBRIDGE_LOCAL_HOST: {}", host))?;
        }

        if let Ok(timeout) = std::env::var("PORTBRIDGE_CONNECT_TIMEOUT") {
            config.forward.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PORTBRIDGE_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(timeout) = std::env::var("PORTBRIDGE_IDLE_TIMEOUT") {
            config.forward.idle_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PORTBRIDGE_IDLE_TIMEOUT: {}", timeout))?;
        }

        if let Ok(size) = std::env::var("PORTBRIDGE_BUFFER_SIZE") {
            config.forward.buffer_size = size
                .parse::<usize>()
                .with_context(|| format!("Invalid PORTBRIDGE_BUFFER_SIZE: {}", size))?;
        }

        Ok(())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.control.url.trim().is_empty() {
            bail!("control.url must not be empty");
        }

        if self.forward.mappings.is_empty() {
            bail!("forward.mappings must list at least one port");
        }

        let mut seen = HashSet::new();
        for mapping in &self.forward.mappings {
            if mapping.local_port == 0 || mapping.remote_port == 0 {
                bail!("port 0 is not a valid forwarding port");
            }
            if !seen.insert(mapping.local_port) {
                bail!("local port {} is mapped more than once", mapping.local_port);
            }
        }

        if self.forward.buffer_size == 0 {
            bail!("forward.buffer_size must be greater than 0");
        }

        if self.forward.buffer_size > 1048576 {
            bail!("forward.buffer_size cannot exceed 1MB");
        }

        if self.forward.connect_timeout.as_secs() == 0 {
            bail!("forward.connect_timeout must be at least one second");
        }

        if self.forward.idle_timeout.as_secs() == 0 {
            bail!("forward.idle_timeout must be at least one second");
        }

        Ok(())
    }
}
