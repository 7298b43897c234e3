// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// Whole-file JSON persistence shared by the profile store and the tracker

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Load a collection, treating a missing or unreadable file as empty
pub(crate) fn load_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        debug!("State file does not exist yet: {}", path.display());
        return T::default();
    }

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Failed to read {}: {}, starting empty", path.display(), e);
            return T::default();
        }
    };

    if contents.trim().is_empty() {
        return T::default();
    }

    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse {}: {}, starting empty", path.display(), e);
            T::default()
        }
    }
}

/// Rewrite the whole file through a temp file and a rename
pub(crate) fn save<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::storage(format!("Failed to serialize {}", path.display()), e))?;

    let tmp = temp_path(path);
    fs::write(&tmp, json)
        .map_err(|e| Error::storage(format!("Failed to write {}", tmp.display()), e))?;
    set_file_permissions_private(&tmp)?;

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::storage(
            format!("Failed to replace {}", path.display()),
            e,
        ));
    }

    debug!("Saved {}", path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(dir)
        .map_err(|e| Error::storage(format!("Failed to create {}", dir.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::storage(format!("Failed to set permissions on {}", dir.display()), e))?;
    }

    debug!("Created state directory: {}", dir.display());
    Ok(())
}

/// Set file permissions to 0600 (owner read/write only)
fn set_file_permissions_private(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::storage(format!("Failed to set permissions on {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
