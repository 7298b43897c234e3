// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// PortManager - Profile Store
// Named SSH profiles persisted as a single JSON map

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{ForwardRule, Profile};
use crate::error::{Error, Result};
use crate::state_file;
use crate::types::AuthMethod;

/// Durable collection of profiles, keyed and ordered by name
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    profiles: BTreeMap<String, Profile>,
}

impl ProfileStore {
    /// Open the store at `path`; a missing or corrupt file gives an empty store
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut profiles: BTreeMap<String, Profile> = state_file::load_or_default(&path);
        for (name, profile) in profiles.iter_mut() {
            profile.name = name.clone();
        }
        debug!("Loaded {} profile(s) from {}", profiles.len(), path.display());
        Self { path, profiles }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create or fully replace a profile; forwards are cleared on replace
    pub fn add_or_replace(
        &mut self,
        name: &str,
        host: &str,
        user: &str,
        port: u32,
        auth: AuthMethod,
    ) -> Result<&Profile> {
        let profile = Profile::new(name, host, user, port, auth)?;
        let replaced = self.profiles.contains_key(name);

        self.commit(|profiles| {
            profiles.insert(name.to_string(), profile);
        })?;

        if replaced {
            info!("Replaced profile '{}'", name);
        } else {
            info!("Added profile '{}'", name);
        }
        self.get(name)
    }

    /// Append a forward rule to an existing profile
    pub fn add_forward(&mut self, name: &str, rule: ForwardRule) -> Result<&Profile> {
        if !self.profiles.contains_key(name) {
            return Err(self.not_found(name));
        }
        rule.validate()?;

        info!("Adding {} forward to '{}': {}", rule.direction, name, rule.describe());
        self.commit(|profiles| {
            if let Some(profile) = profiles.get_mut(name) {
                profile.forwards.push(rule);
            }
        })?;
        self.get(name)
    }

    /// Remove a profile; returns whether one existed
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        if !self.profiles.contains_key(name) {
            debug!("Delete of unknown profile '{}' ignored", name);
            return Ok(false);
        }

        self.commit(|profiles| {
            profiles.remove(name);
        })?;
        info!("Deleted profile '{}'", name);
        Ok(true)
    }

    /// All profiles, ordered by name
    pub fn list(&self) -> Vec<&Profile> {
        self.profiles.values().collect()
    }

    pub fn get(&self, name: &str) -> Result<&Profile> {
        self.profiles.get(name).ok_or_else(|| self.not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Sorted profile names
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Record a successful launch
    pub fn touch_last_connected(&mut self, name: &str, at: DateTime<Utc>) -> Result<&Profile> {
        if !self.profiles.contains_key(name) {
            return Err(self.not_found(name));
        }

        self.commit(|profiles| {
            if let Some(profile) = profiles.get_mut(name) {
                profile.last_connected = Some(at);
            }
        })?;
        self.get(name)
    }

    fn not_found(&self, name: &str) -> Error {
        Error::not_found(name, self.names())
    }

    // Apply a change to a copy, persist it, and only then keep it
    fn commit<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, Profile>),
    {
        let mut next = self.profiles.clone();
        change(&mut next);
        state_file::save(&self.path, &next)?;
        self.profiles = next;
        Ok(())
    }
}
