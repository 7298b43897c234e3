// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// Common types for PortManager

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Authentication method for an SSH profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum AuthMethod {
    /// Private key file (may contain `~`)
    Key { path: PathBuf },
    /// No key: interactive password or agent
    Password,
}

impl AuthMethod {
    /// Key auth from an optional CLI path; `None` means password
    pub fn from_key_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => AuthMethod::Key { path },
            None => AuthMethod::Password,
        }
    }

    pub fn key_path(&self) -> Option<&PathBuf> {
        match self {
            AuthMethod::Key { path } => Some(path),
            AuthMethod::Password => None,
        }
    }
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Password
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Key { path } => write!(f, "Key: {}", path.display()),
            AuthMethod::Password => write!(f, "Password"),
        }
    }
}

/// Direction of a port forward, named by user intent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForwardDirection {
    /// Reach a service on the remote side from a local port (`ssh -L`)
    #[default]
    Local,
    /// Expose a local service on a port of the remote side (`ssh -R`)
    Remote,
}

impl ForwardDirection {
    /// Flag understood by OpenSSH for this direction
    pub fn flag(self) -> &'static str {
        match self {
            ForwardDirection::Local => "-L",
            ForwardDirection::Remote => "-R",
        }
    }
}

impl fmt::Display for ForwardDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardDirection::Local => write!(f, "local"),
            ForwardDirection::Remote => write!(f, "remote"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_serialization_shape() {
        let key = AuthMethod::Key {
            path: PathBuf::from("~/.ssh/id_ed25519"),
        };
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["method"], "key");
        assert_eq!(json["path"], "~/.ssh/id_ed25519");

        let json = serde_json::to_value(AuthMethod::Password).unwrap();
        assert_eq!(json, serde_json::json!({ "method": "password" }));
    }

    #[test]
    fn test_from_key_path() {
        assert_eq!(AuthMethod::from_key_path(None), AuthMethod::Password);
        let auth = AuthMethod::from_key_path(Some(PathBuf::from("/k")));
        assert_eq!(auth.key_path(), Some(&PathBuf::from("/k")));
    }

    #[test]
    fn test_direction_flags() {
        assert_eq!(ForwardDirection::Local.flag(), "-L");
        assert_eq!(ForwardDirection::Remote.flag(), "-R");
        let parsed: ForwardDirection = serde_json::from_str("\"remote\"").unwrap();
        assert_eq!(parsed, ForwardDirection::Remote);
    }
}
