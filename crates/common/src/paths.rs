// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// State directory layout

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const STATE_DIR_NAME: &str = ".portmanager";
const PROFILES_FILE: &str = "profiles.json";
const ACTIVE_FILE: &str = "active_connections.json";

/// Location of the persisted profile and active-connection files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.portmanager`
    pub fn default_root() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Storage("Could not determine home directory".to_string()))?;
        Ok(home.join(STATE_DIR_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.root.join(PROFILES_FILE)
    }

    pub fn active_file(&self) -> PathBuf {
        self.root.join(ACTIVE_FILE)
    }
}
