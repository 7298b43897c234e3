// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// PortManager - Active Connection Tracker
// Background SSH processes we launched, persisted as a JSON map

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{required_timestamp, Profile};
use crate::error::{Error, Result};
use crate::process::TrackedProcess;
use crate::state_file;

/// A background connection and the profile it was started from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveConnection {
    #[serde(skip)]
    pub profile_name: String,
    /// Copy of the profile at launch time
    #[serde(rename = "profile")]
    pub snapshot: Profile,
    #[serde(alias = "started", deserialize_with = "required_timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Exact argument list that was launched
    #[serde(default)]
    pub command: Vec<String>,
}

impl ActiveConnection {
    pub fn new(snapshot: Profile, pid: Option<u32>, command: Vec<String>) -> Self {
        Self {
            profile_name: snapshot.name.clone(),
            snapshot,
            started_at: Utc::now(),
            pid,
            command,
        }
    }

    /// What identifies the launched process, if its PID is known
    pub fn tracked(&self) -> Option<TrackedProcess<'_>> {
        self.pid.map(|pid| TrackedProcess {
            pid,
            command: &self.command,
            started_at: self.started_at,
        })
    }
}

/// Durable collection of active connections, one per profile name
#[derive(Debug)]
pub struct ActiveConnectionTracker {
    path: PathBuf,
    connections: BTreeMap<String, ActiveConnection>,
}

impl ActiveConnectionTracker {
    /// Open the tracker at `path`; a missing or corrupt file gives an empty tracker
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut connections: BTreeMap<String, ActiveConnection> =
            state_file::load_or_default(&path);
        for (name, connection) in connections.iter_mut() {
            connection.profile_name = name.clone();
            connection.snapshot.name = name.clone();
        }
        debug!(
            "Loaded {} active connection(s) from {}",
            connections.len(),
            path.display()
        );
        Self { path, connections }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store an entry, replacing any previous one for the same profile
    pub fn record(&mut self, connection: ActiveConnection) -> Result<()> {
        let name = connection.profile_name.clone();
        let mut next = self.connections.clone();
        if let Some(previous) = next.insert(name.clone(), connection) {
            debug!(
                "Replacing tracked connection for '{}' (PID {:?})",
                name, previous.pid
            );
        }
        state_file::save(&self.path, &next)?;
        self.connections = next;
        info!("Tracking background connection for '{}'", name);
        Ok(())
    }

    /// Drop the entry for `name`, returning it if there was one
    pub fn remove(&mut self, name: &str) -> Result<Option<ActiveConnection>> {
        if !self.connections.contains_key(name) {
            return Ok(None);
        }

        let mut next = self.connections.clone();
        let removed = next.remove(name);
        state_file::save(&self.path, &next)?;
        self.connections = next;
        info!("Stopped tracking connection for '{}'", name);
        Ok(removed)
    }

    /// All entries ordered by profile name, including ones whose profile is gone
    pub fn list(&self) -> Vec<&ActiveConnection> {
        self.connections.values().collect()
    }

    pub fn get(&self, name: &str) -> Result<&ActiveConnection> {
        self.connections
            .get(name)
            .ok_or_else(|| Error::not_found(name, self.connections.keys().cloned().collect()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardRule;
    use crate::profile_manager::ProfileStore;
    use crate::types::AuthMethod;
    use std::fs;
    use tempfile::TempDir;

    fn snapshot(name: &str) -> Profile {
        let mut profile =
            Profile::new(name, "example.com", "admin", 22, AuthMethod::Password).unwrap();
        profile.forwards.push(ForwardRule::local(8080, 80));
        profile
    }

    #[test]
    fn test_record_get_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active.json");
        let mut tracker = ActiveConnectionTracker::open(&path);

        let entry = ActiveConnection::new(snapshot("web"), Some(4242), vec!["ssh".to_string()]);
        tracker.record(entry.clone()).unwrap();

        let reloaded = ActiveConnectionTracker::open(&path);
        assert_eq!(reloaded.get("web").unwrap(), &entry);
        assert_eq!(reloaded.get("web").unwrap().snapshot.name, "web");

        let removed = tracker.remove("web").unwrap();
        assert_eq!(removed.map(|c| c.pid), Some(Some(4242)));
        assert!(tracker.remove("web").unwrap().is_none());
        assert!(ActiveConnectionTracker::open(&path).is_empty());
    }

    #[test]
    fn test_second_record_overwrites() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ActiveConnectionTracker::open(dir.path().join("active.json"));

        tracker
            .record(ActiveConnection::new(snapshot("web"), Some(1), Vec::new()))
            .unwrap();
        tracker
            .record(ActiveConnection::new(snapshot("web"), Some(2), Vec::new()))
            .unwrap();

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get("web").unwrap().pid, Some(2));
    }

    #[test]
    fn test_missing_pid_is_fine() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active.json");
        let mut tracker = ActiveConnectionTracker::open(&path);
        tracker
            .record(ActiveConnection::new(snapshot("web"), None, Vec::new()))
            .unwrap();

        let reloaded = ActiveConnectionTracker::open(&path);
        assert_eq!(reloaded.get("web").unwrap().pid, None);
    }

    #[test]
    fn test_orphaned_entries_are_listed() {
        let dir = TempDir::new().unwrap();
        let mut profiles = ProfileStore::open(dir.path().join("profiles.json"));
        let mut tracker = ActiveConnectionTracker::open(dir.path().join("active.json"));

        let profile = profiles
            .add_or_replace("db", "db.example.com", "admin", 22, AuthMethod::Password)
            .unwrap()
            .clone();
        tracker
            .record(ActiveConnection::new(profile, Some(99), Vec::new()))
            .unwrap();
        profiles.delete("db").unwrap();

        let tracker = ActiveConnectionTracker::open(dir.path().join("active.json"));
        let listed = tracker.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].profile_name, "db");
        assert_eq!(listed[0].snapshot.host, "db.example.com");
        assert!(!profiles.contains("db"));
    }

    #[test]
    fn test_snapshot_is_independent_of_store() {
        let dir = TempDir::new().unwrap();
        let mut profiles = ProfileStore::open(dir.path().join("profiles.json"));
        let mut tracker = ActiveConnectionTracker::open(dir.path().join("active.json"));

        let profile = profiles
            .add_or_replace("db", "old.example.com", "admin", 22, AuthMethod::Password)
            .unwrap()
            .clone();
        tracker
            .record(ActiveConnection::new(profile, None, Vec::new()))
            .unwrap();
        profiles
            .add_or_replace("db", "new.example.com", "admin", 22, AuthMethod::Password)
            .unwrap();

        assert_eq!(tracker.get("db").unwrap().snapshot.host, "old.example.com");
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let tracker = ActiveConnectionTracker::open(dir.path().join("active.json"));
        assert!(matches!(tracker.get("web"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_legacy_entries_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active.json");
        fs::write(
            &path,
            r#"{"web": {
                "started": "2024-01-01T12:00:00.123456",
                "profile": {"host": "example.com", "user": "admin", "port": 22,
                            "forwards": [], "key": "~/.ssh/id_rsa",
                            "created": "2024-01-01T11:00:00", "last_used": null}
            }}"#,
        )
        .unwrap();

        let tracker = ActiveConnectionTracker::open(&path);
        let entry = tracker.get("web").unwrap();
        assert_eq!(entry.pid, None);
        assert!(entry.tracked().is_none());
        assert!(entry.command.is_empty());
        assert_eq!(
            entry.snapshot.auth,
            AuthMethod::Key {
                path: "~/.ssh/id_rsa".into()
            }
        );
    }

    #[test]
    fn test_tracked_process_carries_identity() {
        let command = vec!["ssh".to_string(), "-N".to_string()];
        let entry = ActiveConnection::new(snapshot("web"), Some(77), command.clone());
        let tracked = entry.tracked().unwrap();
        assert_eq!(tracked.pid, 77);
        assert_eq!(tracked.command, &command[..]);
        assert_eq!(tracked.started_at, entry.started_at);
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active.json");
        fs::write(&path, "garbage").unwrap();
        assert!(ActiveConnectionTracker::open(&path).is_empty());
    }
}
