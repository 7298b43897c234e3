// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// PortManager - CLI Config Module
// Optional TOML file choosing the state directory and SSH executable

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use portmanager_common::{LaunchOptions, StatePaths, DEFAULT_SSH_PROGRAM};

/// CLI configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CliConfig {
    /// Where profiles.json and active_connections.json live (default: ~/.portmanager)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// SSH executable name or path
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,

    /// Arguments added after the executable for background connections
    #[serde(default = "default_background_args")]
    pub background_args: Vec<String>,
}

fn default_ssh_program() -> String {
    DEFAULT_SSH_PROGRAM.to_string()
}

fn default_background_args() -> Vec<String> {
    LaunchOptions::default().background_args
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            ssh_program: default_ssh_program(),
            background_args: default_background_args(),
        }
    }
}

impl CliConfig {
    /// Load CLI configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load CLI configuration from `path`, using defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No CLI configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        debug!("Loaded CLI configuration from {}", path.display());
        Ok(config)
    }

    /// Get the path to the CLI configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("portmanager").join("config.toml"))
    }

    /// State location: explicit override, then config file, then ~/.portmanager
    pub fn state_paths(&self, override_dir: Option<&Path>) -> Result<StatePaths> {
        let root = match override_dir.or(self.state_dir.as_deref()) {
            Some(dir) => expand(dir),
            None => StatePaths::default_root()?,
        };
        Ok(StatePaths::new(root))
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            program: self.ssh_program.clone(),
            background_args: self.background_args.clone(),
        }
    }
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}
