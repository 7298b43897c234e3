// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// SSH command construction

use std::path::Path;

use crate::config::{Profile, DEFAULT_SSH_PORT};

/// Default SSH executable
pub const DEFAULT_SSH_PROGRAM: &str = "ssh";

/// Build the argument list that connects to `profile`
///
/// Order: program, `-i key`, `-p port` (only when not 22), one `-L`/`-R`
/// per forward in stored order, then `user@host`. The same profile always
/// produces the same tokens.
pub fn build_ssh_command(program: &str, profile: &Profile) -> Vec<String> {
    let mut args = vec![program.to_string()];

    if let Some(key_path) = profile.key_path() {
        args.push("-i".to_string());
        args.push(expand_tilde(key_path));
    }

    if profile.port != DEFAULT_SSH_PORT {
        args.push("-p".to_string());
        args.push(profile.port.to_string());
    }

    for forward in &profile.forwards {
        args.push(forward.direction.flag().to_string());
        args.push(forward.spec());
    }

    args.push(profile.target());
    args
}

/// Join tokens for display
pub fn display_command(args: &[String]) -> String {
    args.join(" ")
}

fn expand_tilde(path: &Path) -> String {
    let raw = path.to_string_lossy();
    shellexpand::tilde(&raw).into_owned()
}
