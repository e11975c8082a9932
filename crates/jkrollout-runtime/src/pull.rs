//! Image pulls through the container runtime.
//!
//! The runtime writes into a hidden staging directory next to the
//! destination and the finished file is renamed into place, so an
//! interrupted pull never leaves a truncated image under the final name.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use jkrollout_common::error::{ProvisionError, Result};
use jkrollout_common::types::ImageReference;

use crate::invoker::ContainerRuntime;

/// Pulls `source` (e.g. `docker://pytorch/pytorch:2.9.1`) to `destination`.
///
/// # Errors
///
/// Returns [`ProvisionError::Io`] if the destination exists and `force` is
/// false or its directory cannot be prepared,
/// [`ProvisionError::RuntimeInvocation`] if the pull fails, and
/// [`ProvisionError::Rename`] if the finished image cannot be moved into
/// place.
pub fn pull_image(
    runtime: &dyn ContainerRuntime,
    source: &str,
    destination: &Path,
    force: bool,
    timeout: Duration,
) -> Result<ImageReference> {
    if destination.exists() && !force {
        return Err(ProvisionError::Io {
            path: destination.to_path_buf(),
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                "image already exists (use --force to replace it)",
            ),
        });
    }
    let file_name = destination.file_name().ok_or_else(|| ProvisionError::Config {
        message: format!("`{}` does not name an image file", destination.display()),
    })?;
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| ProvisionError::Io {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let staging = tempfile::Builder::new()
        .prefix(".jkrollout-pull-")
        .tempdir_in(parent)
        .map_err(|e| ProvisionError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    let staged = staging.path().join(file_name);
    let _ = runtime.pull(source, &staged, timeout)?;

    std::fs::rename(&staged, destination).map_err(|e| ProvisionError::Rename {
        from: staged.clone(),
        to: destination.to_path_buf(),
        source: e,
    })?;
    tracing::info!(source, image = %destination.display(), "image pulled");
    Ok(ImageReference::new(destination))
}
