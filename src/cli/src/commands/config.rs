//! Configuration management commands.
//!
//! Stores CLI configuration in `~/.hubsync/config.toml`.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Central server URL to store
        #[arg(long)]
        api_url: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (api-url, leaf-hub)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Persistent CLI configuration stored on disk.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default filter for `hubsync status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_hub: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            leaf_hub: None,
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

impl CliConfig {
    fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "api-url" => self.api_url = value,
            "leaf-hub" => self.leaf_hub = Some(value),
            other => anyhow::bail!("unknown configuration key '{}'", other),
        }
        Ok(())
    }
}

/// Return the path to the configuration file (`~/.hubsync/config.toml`).
fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".hubsync").join("config.toml"))
}

/// Load the CLI configuration from disk, returning defaults if the file does
/// not exist.
pub fn load_config() -> Result<CliConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Save the CLI configuration to disk, creating the directory if needed.
fn save_config(cfg: &CliConfig) -> Result<PathBuf> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let cfg = load_config()?;
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    output::print_detail("api-url", &cfg.api_url);
                    output::print_detail("leaf-hub", cfg.leaf_hub.as_deref().unwrap_or("-"));
                    output::print_detail("file", &config_path()?.display().to_string());
                }
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::Init { api_url, force } => {
            let path = config_path()?;
            if path.exists() && !force {
                output::print_info(&format!(
                    "{} already exists. Use --force to overwrite.",
                    path.display()
                ));
                return Ok(());
            }

            let mut cfg = CliConfig::default();
            if let Some(url) = api_url {
                cfg.api_url = url;
            }
            let path = save_config(&cfg)?;
            output::print_success(&format!("Wrote {}", path.display()));
        }

        ConfigCommands::Set { key, value } => {
            let mut cfg = load_config()?;
            cfg.set(&key, value.clone())?;
            save_config(&cfg)?;

            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, value)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg: CliConfig = toml::from_str("leaf-hub = \"hub1\"").unwrap();
        assert_eq!(cfg.api_url, "http://localhost:8080");
        assert_eq!(cfg.leaf_hub.as_deref(), Some("hub1"));
    }

    #[test]
    fn test_set_rejects_unknown_key() {
        let mut cfg = CliConfig::default();
        cfg.set("api-url", "http://central:9090".into()).unwrap();
        assert_eq!(cfg.api_url, "http://central:9090");
        assert!(cfg.set("colour", "blue".into()).is_err());
    }
}
