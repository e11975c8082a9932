//! Install log management for overlay directories.

use std::io::Write;
use std::path::{Path, PathBuf};

use jkrollout_common::constants::OVERLAY_STATE_DIR;
use jkrollout_common::error::{ProvisionError, Result};

/// Returns the install log path for an overlay.
#[must_use]
pub fn install_log_path(overlay_dir: &Path) -> PathBuf {
    overlay_dir.join(OVERLAY_STATE_DIR).join("install.log")
}

/// Reads an overlay's install log.
///
/// Returns an empty string if nothing was installed yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(overlay_dir: &Path) -> Result<String> {
    let path = install_log_path(overlay_dir);
    if !path.exists() {
        return Ok(String::new());
    }
    std::fs::read_to_string(&path).map_err(|e| ProvisionError::Io { path, source: e })
}

/// Appends a timestamped entry to an overlay's install log.
///
/// Creates the bookkeeping directory if it does not exist.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created or written.
pub fn append_log(overlay_dir: &Path, title: &str, body: &str) -> Result<()> {
    let path = install_log_path(overlay_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ProvisionError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| ProvisionError::Io {
            path: path.clone(),
            source: e,
        })?;
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    writeln!(file, "== {stamp} {title}")
        .and_then(|()| {
            if body.is_empty() {
                Ok(())
            } else {
                writeln!(file, "{}", body.trim_end())
            }
        })
        .map_err(|e| ProvisionError::Io { path, source: e })?;
    Ok(())
}
