// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// PortManager - Common Library
// Profiles, forward rules, SSH command construction and connection tracking

pub mod active;
pub mod command;
pub mod config;
pub mod error;
pub mod launcher;
pub mod paths;
pub mod process;
pub mod profile_manager;
mod state_file;
pub mod types;

pub use active::{ActiveConnection, ActiveConnectionTracker};
pub use command::{build_ssh_command, display_command, DEFAULT_SSH_PROGRAM};
pub use config::{format_timestamp, parse_timestamp, validate_port, ForwardRule, Profile};
pub use error::{Error, Result};
pub use launcher::{
    ActiveStatus, ConnectOutcome, ConnectionLauncher, DisconnectOutcome, LaunchOptions,
};
pub use paths::StatePaths;
pub use process::{Liveness, ProcessExit, ProcessRunner, SystemRunner, TrackedProcess};
pub use profile_manager::ProfileStore;
pub use types::{AuthMethod, ForwardDirection};

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
