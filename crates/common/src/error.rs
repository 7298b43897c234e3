// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// Error types for PortManager

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Rejected input to a profile or forward mutation
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Referenced profile (or tracked connection) does not exist
    #[error("Profile '{name}' not found")]
    NotFound {
        name: String,
        /// Names that do exist, for the caller to suggest
        available: Vec<String>,
    },

    /// The SSH executable could not be started
    #[error("Failed to launch '{program}': {reason}")]
    Launch { program: String, reason: String },

    /// The SSH executable ran but did not exit cleanly
    #[error("SSH session for '{name}' exited with {}", describe_exit(.code))]
    Exited { name: String, code: Option<i32> },

    /// A background tunnel for the profile is still running
    #[error("Profile '{name}' already has an active background connection (PID {pid})")]
    AlreadyActive { name: String, pid: u32 },

    /// Persistent state could not be written
    #[error("Storage error: {0}")]
    Storage(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl Error {
    pub(crate) fn not_found(name: &str, available: Vec<String>) -> Self {
        Error::NotFound {
            name: name.to_string(),
            available,
        }
    }

    pub(crate) fn storage(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::Storage(format!("{}: {}", context, err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_messages() {
        let err = Error::Exited {
            name: "db".to_string(),
            code: Some(255),
        };
        assert_eq!(err.to_string(), "SSH session for 'db' exited with status 255");

        let err = Error::Exited {
            name: "db".to_string(),
            code: None,
        };
        assert!(err.to_string().ends_with("a signal"));
    }

    #[test]
    fn test_not_found_message_has_name() {
        let err = Error::not_found("web", vec!["db".to_string()]);
        assert_eq!(err.to_string(), "Profile 'web' not found");
    }
}
