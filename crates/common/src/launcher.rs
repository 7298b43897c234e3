// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// PortManager - Connection Launcher
// Turns a stored profile into a running SSH process and keeps the tracker in sync

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::active::{ActiveConnection, ActiveConnectionTracker};
use crate::command::{build_ssh_command, DEFAULT_SSH_PROGRAM};
use crate::error::{Error, Result};
use crate::process::{Liveness, ProcessRunner};
use crate::profile_manager::ProfileStore;

/// How the SSH executable is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// SSH executable name or path
    pub program: String,
    /// Extra arguments placed right after the program in background mode
    pub background_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            program: DEFAULT_SSH_PROGRAM.to_string(),
            background_args: vec!["-N".to_string()],
        }
    }
}

/// What a successful `connect` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Foreground session ran and exited cleanly
    Finished,
    /// Background process started and is now tracked
    Background { pid: Option<u32> },
}

/// What `disconnect` did with the tracked process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectOutcome {
    pub pid: Option<u32>,
    /// Whether a termination signal was delivered
    pub terminated: bool,
}

/// A tracked connection with its probed state
#[derive(Debug)]
pub struct ActiveStatus<'a> {
    pub connection: &'a ActiveConnection,
    pub liveness: Liveness,
    /// The profile was deleted after launch
    pub orphaned: bool,
}

pub struct ConnectionLauncher<R: ProcessRunner> {
    profiles: ProfileStore,
    tracker: ActiveConnectionTracker,
    runner: R,
    options: LaunchOptions,
}

impl<R: ProcessRunner> ConnectionLauncher<R> {
    pub fn new(
        profiles: ProfileStore,
        tracker: ActiveConnectionTracker,
        runner: R,
        options: LaunchOptions,
    ) -> Self {
        Self {
            profiles,
            tracker,
            runner,
            options,
        }
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ProfileStore {
        &mut self.profiles
    }

    pub fn tracker(&self) -> &ActiveConnectionTracker {
        &self.tracker
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// Command `connect` would run in foreground mode
    pub fn command_for(&self, name: &str) -> Result<Vec<String>> {
        let profile = self.profiles.get(name)?;
        Ok(build_ssh_command(&self.options.program, profile))
    }

    /// Launch SSH for a profile, attached or in the background
    pub fn connect(&mut self, name: &str, background: bool) -> Result<ConnectOutcome> {
        let profile = self.profiles.get(name)?.clone();
        let mut command = build_ssh_command(&self.options.program, &profile);

        if !background {
            info!("Connecting to '{}' in foreground", name);
            let exit = self.runner.run_foreground(&command)?;
            self.profiles.touch_last_connected(name, Utc::now())?;

            if !exit.success() {
                return Err(Error::Exited {
                    name: name.to_string(),
                    code: exit.code,
                });
            }
            return Ok(ConnectOutcome::Finished);
        }

        self.ensure_not_running(name)?;

        let target_args = command.split_off(1);
        command.extend(self.options.background_args.iter().cloned());
        command.extend(target_args);
        info!("Connecting to '{}' in background", name);
        let pid = self.runner.spawn_detached(&command)?;

        // Track the process before anything else can fail
        let mut connection = ActiveConnection::new(profile, pid, command);
        connection.snapshot.last_connected = Some(connection.started_at);
        let started_at = connection.started_at;
        if let Err(e) = self.tracker.record(connection.clone()) {
            self.stop_untracked(name, &connection);
            return Err(e);
        }

        if let Err(e) = self.profiles.touch_last_connected(name, started_at) {
            warn!("Connected '{}' but could not save last-connected time: {}", name, e);
        }

        Ok(ConnectOutcome::Background { pid })
    }

    /// Stop a tracked background connection; the entry is always removed
    pub fn disconnect(&mut self, name: &str) -> Result<DisconnectOutcome> {
        let connection = self.tracker.get(name)?;
        let pid = connection.pid;

        let terminated = match connection.tracked() {
            Some(process) => match self.runner.terminate(&process) {
                Ok(delivered) => delivered,
                Err(e) => {
                    warn!("Could not terminate process {} for '{}': {}", process.pid, name, e);
                    false
                }
            },
            None => {
                debug!("No PID recorded for '{}', only clearing the entry", name);
                false
            }
        };

        self.tracker.remove(name)?;
        Ok(DisconnectOutcome { pid, terminated })
    }

    /// Tracked connections with their current liveness
    pub fn active(&self) -> Vec<ActiveStatus<'_>> {
        self.tracker
            .list()
            .into_iter()
            .map(|connection| ActiveStatus {
                connection,
                liveness: self.liveness_of(connection),
                orphaned: !self.profiles.contains(&connection.profile_name),
            })
            .collect()
    }

    /// Forget entries whose process is known to have exited
    pub fn prune_stale(&mut self) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .active()
            .into_iter()
            .filter(|status| status.liveness == Liveness::Exited)
            .map(|status| status.connection.profile_name.clone())
            .collect();

        for name in &stale {
            info!("Removing stale connection entry for '{}'", name);
            self.tracker.remove(name)?;
        }
        Ok(stale)
    }

    fn liveness_of(&self, connection: &ActiveConnection) -> Liveness {
        match connection.tracked() {
            Some(process) => self.runner.liveness(&process),
            None => Liveness::Unknown,
        }
    }

    // A tunnel nobody tracks could never be disconnected
    fn stop_untracked(&self, name: &str, connection: &ActiveConnection) {
        let Some(process) = connection.tracked() else {
            warn!("Could not track '{}' and its PID is unknown; it may still be running", name);
            return;
        };
        match self.runner.terminate(&process) {
            Ok(_) => info!("Stopped untracked process {} for '{}'", process.pid, name),
            Err(e) => warn!(
                "Could not stop untracked process {} for '{}': {}",
                process.pid, name, e
            ),
        }
    }

    fn ensure_not_running(&self, name: &str) -> Result<()> {
        let Ok(existing) = self.tracker.get(name) else {
            return Ok(());
        };

        match (existing.pid, self.liveness_of(existing)) {
            (Some(pid), Liveness::Running) => Err(Error::AlreadyActive {
                name: name.to_string(),
                pid,
            }),
            _ => {
                debug!("Replacing stale tracker entry for '{}'", name);
                Ok(())
            }
        }
    }
}
