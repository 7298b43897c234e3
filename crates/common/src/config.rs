// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// Profile and forward rule structures for PortManager

use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::types::{AuthMethod, ForwardDirection};

/// Default SSH port, omitted from built commands
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Saved SSH connection profile
///
/// The name is the key of the persisted map, so it is not serialized with
/// the rest of the record. Loaders fill it back in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "StoredProfile")]
pub struct Profile {
    #[serde(skip)]
    pub name: String,
    /// SSH server hostname or IP
    pub host: String,
    /// SSH username
    pub user: String,
    /// SSH server port (default: 22)
    pub port: u16,
    /// Authentication method
    pub auth: AuthMethod,
    /// Port forwards, in the order they were added
    pub forwards: Vec<ForwardRule>,
    /// When this profile was (re)created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last successful launch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
}

/// Profile record as read from disk
///
/// Also reads the legacy layout, which stores a bare `key` path and names the
/// timestamps `created` and `last_used`.
#[derive(Deserialize)]
struct StoredProfile {
    host: String,
    user: String,
    #[serde(default = "default_ssh_port")]
    port: u16,
    #[serde(default)]
    auth: Option<AuthMethod>,
    #[serde(default)]
    key: Option<PathBuf>,
    #[serde(default)]
    forwards: Vec<ForwardRule>,
    #[serde(default, alias = "created", deserialize_with = "lenient_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "last_used", deserialize_with = "lenient_timestamp")]
    last_connected: Option<DateTime<Utc>>,
}

impl From<StoredProfile> for Profile {
    fn from(stored: StoredProfile) -> Self {
        let auth = match stored.auth {
            Some(auth) => auth,
            None => AuthMethod::from_key_path(stored.key),
        };
        Self {
            name: String::new(),
            host: stored.host,
            user: stored.user,
            port: stored.port,
            auth,
            forwards: stored.forwards,
            created_at: stored.created_at,
            last_connected: stored.last_connected,
        }
    }
}

/// A single local or remote port forward
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardRule {
    #[serde(rename = "type", default)]
    pub direction: ForwardDirection,
    pub local_port: u16,
    pub remote_port: u16,
    /// Target host as seen from the SSH server
    #[serde(default = "default_remote_host")]
    pub remote_host: String,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_remote_host() -> String {
    "localhost".to_string()
}

/// Check that a port fits in [1, 65535]
pub fn validate_port(port: u32, what: &str) -> Result<u16> {
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(Error::Validation(format!(
            "{} must be between 1 and 65535 (got {})",
            what, port
        ))),
    }
}

fn require_non_empty(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} cannot be empty", what)));
    }
    Ok(())
}

// ssh would parse a leading '-' in the target as an option
fn require_not_option(value: &str, what: &str) -> Result<()> {
    if value.trim_start().starts_with('-') {
        return Err(Error::Validation(format!(
            "{} cannot start with '-' (got '{}')",
            what, value
        )));
    }
    Ok(())
}

impl Profile {
    /// Create a validated profile with no forwards
    pub fn new(name: &str, host: &str, user: &str, port: u32, auth: AuthMethod) -> Result<Self> {
        let port = validate_port(port, "Port")?;
        let profile = Self {
            name: name.to_string(),
            host: host.to_string(),
            user: user.to_string(),
            port,
            auth,
            forwards: Vec::new(),
            created_at: Some(Utc::now()),
            last_connected: None,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Validate the profile configuration
    pub fn validate(&self) -> Result<()> {
        require_non_empty(&self.name, "Profile name")?;
        require_non_empty(&self.host, "Host")?;
        require_non_empty(&self.user, "User")?;
        require_not_option(&self.host, "Host")?;
        require_not_option(&self.user, "User")?;
        validate_port(u32::from(self.port), "Port")?;

        if let AuthMethod::Key { path } = &self.auth {
            if path.as_os_str().is_empty() {
                return Err(Error::Validation("Key path cannot be empty".to_string()));
            }
        }

        for forward in &self.forwards {
            forward.validate()?;
        }

        Ok(())
    }

    /// `user@host` connection target
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@host:port`, for display
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    pub fn key_path(&self) -> Option<&PathBuf> {
        self.auth.key_path()
    }

    /// Last connection time in local time, or "never"
    pub fn last_connected_display(&self) -> String {
        format_timestamp(self.last_connected)
    }
}

impl ForwardRule {
    /// Create a validated forward rule
    pub fn new(
        direction: ForwardDirection,
        local_port: u32,
        remote_port: u32,
        remote_host: impl Into<String>,
    ) -> Result<Self> {
        let rule = Self {
            direction,
            local_port: validate_port(local_port, "Local port")?,
            remote_port: validate_port(remote_port, "Remote port")?,
            remote_host: remote_host.into(),
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Local forward to `localhost:remote_port` on the server side
    pub fn local(local_port: u16, remote_port: u16) -> Self {
        Self {
            direction: ForwardDirection::Local,
            local_port,
            remote_port,
            remote_host: default_remote_host(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_port(u32::from(self.local_port), "Local port")?;
        validate_port(u32::from(self.remote_port), "Remote port")?;
        require_non_empty(&self.remote_host, "Remote host")?;

        // Remote forwards always deliver to this machine
        if self.direction == ForwardDirection::Remote && self.remote_host != default_remote_host() {
            return Err(Error::Validation(format!(
                "Remote forwards always target localhost (got host '{}')",
                self.remote_host
            )));
        }
        Ok(())
    }

    /// Argument for the `-L` / `-R` flag
    ///
    /// A remote forward makes the server listen on `local_port` and send
    /// traffic back to `remote_port` on this machine.
    pub fn spec(&self) -> String {
        match self.direction {
            ForwardDirection::Local => format!(
                "{}:{}:{}",
                self.local_port, self.remote_host, self.remote_port
            ),
            ForwardDirection::Remote => {
                format!("{}:localhost:{}", self.local_port, self.remote_port)
            }
        }
    }

    /// Human-readable arrow form, e.g. `L: localhost:5432 -> db:5432`
    pub fn describe(&self) -> String {
        match self.direction {
            ForwardDirection::Local => format!(
                "L: localhost:{} -> {}:{}",
                self.local_port, self.remote_host, self.remote_port
            ),
            ForwardDirection::Remote => format!(
                "R: remote:{} -> localhost:{}",
                self.local_port, self.remote_port
            ),
        }
    }
}

/// Parse a stored timestamp
///
/// Accepts RFC 3339 as well as naive ISO-8601 local times such as
/// `2024-01-01T12:00:00.123456`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .map(|local| local.with_timezone(&Utc))
}

/// `%Y-%m-%d %H:%M` in local time, or "never"
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => "never".to_string(),
    }
}

/// Required timestamp; accepts the same formats as `parse_timestamp`
pub(crate) fn required_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

// Bad timestamps load as absent instead of failing the whole file
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|value| value.as_str())
        .and_then(parse_timestamp))
}
