//! Kernel shim capability detection.
//!
//! Runs a version query for the shim module inside the image and
//! classifies the result as present, absent, or inconclusive. Only a
//! recognizable "not installed" failure counts as absent; everything else
//! becomes [`ProvisionError::Detection`] so that a broken image or a hung
//! runtime is never mistaken for a missing package.

use std::path::Path;
use std::time::Duration;

use jkrollout_common::config::{ProvisionerConfig, ShimConfig};
use jkrollout_common::error::{InvocationFailure, ProvisionError, Result};
use jkrollout_common::types::ImageReference;

use crate::invoker::ContainerRuntime;
use crate::overlay::site_options;

/// Why the shim was classified as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absence {
    /// The interpreter runs but cannot import the shim module.
    ModuleMissing,
    /// The interpreter itself is missing from the image.
    InterpreterMissing,
}

/// Result of a shim probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimStatus {
    /// The shim imports cleanly and reported this version.
    Present {
        /// Version string printed by the probe.
        version: String,
    },
    /// The shim is recognizably not installed.
    Absent(Absence),
}

impl ShimStatus {
    /// Returns whether the shim is available.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }
}

/// Probes images for the kernel shim.
pub struct CapabilityDetector<'a> {
    runtime: &'a dyn ContainerRuntime,
    shim: &'a ShimConfig,
    site_dir: &'a str,
    timeout: Duration,
}

impl<'a> CapabilityDetector<'a> {
    /// Creates a detector using the shim settings and probe deadline from
    /// `config`.
    #[must_use]
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a ProvisionerConfig) -> Self {
        Self {
            runtime,
            shim: &config.shim,
            site_dir: &config.container_site_dir,
            timeout: config.detect_timeout(),
        }
    }

    /// Returns the probe command run inside the image.
    #[must_use]
    pub fn probe_command(&self) -> Vec<String> {
        vec![
            self.shim.python.clone(),
            "-c".into(),
            format!(
                "import sys, {m}; sys.stdout.write(getattr({m}, '__version__', 'unknown'))",
                m = self.shim.module
            ),
        ]
    }

    /// Returns whether the shim is present in `image`, with `overlay`
    /// bound when given.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Detection`] if the probe is inconclusive.
    pub fn has_shim(&self, image: &ImageReference, overlay: Option<&Path>) -> Result<bool> {
        self.detect(image, overlay).map(|status| status.is_present())
    }

    /// Probes `image` for the shim.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Detection`] if the probe times out, cannot
    /// start the runtime, or fails in an unrecognized way. A missing image
    /// is reported as [`ProvisionError::ImageNotFound`].
    pub fn detect(&self, image: &ImageReference, overlay: Option<&Path>) -> Result<ShimStatus> {
        let options = site_options(overlay, self.site_dir, self.timeout);
        let result = self.runtime.execute(image, &self.probe_command(), &options);
        let status = match result {
            Ok(out) => {
                let version = out.stdout.trim();
                ShimStatus::Present {
                    version: if version.is_empty() { "unknown" } else { version }.to_owned(),
                }
            }
            Err(ProvisionError::RuntimeInvocation { reason, stderr, .. }) => {
                self.classify_failure(image, &reason, stderr)?
            }
            Err(other) => return Err(other),
        };
        tracing::info!(image = %image, overlay = ?overlay, status = ?status, "shim probe finished");
        Ok(status)
    }

    fn classify_failure(
        &self,
        image: &ImageReference,
        reason: &InvocationFailure,
        stderr: String,
    ) -> Result<ShimStatus> {
        let inconclusive = |message: String| ProvisionError::Detection {
            image: image.path().to_path_buf(),
            message,
            stderr: stderr.clone(),
        };
        let code = match reason {
            InvocationFailure::Exit { code } => *code,
            InvocationFailure::TimedOut { secs } => {
                return Err(inconclusive(format!("probe timed out after {secs}s")));
            }
            InvocationFailure::Spawn(e) => {
                return Err(inconclusive(format!("container runtime could not be started: {e}")));
            }
            InvocationFailure::Signal => {
                return Err(inconclusive("probe was terminated by a signal".into()));
            }
        };
        if stderr.contains("ModuleNotFoundError") || stderr.contains("No module named") {
            return Ok(ShimStatus::Absent(Absence::ModuleMissing));
        }
        if code == 127
            || (stderr.contains("executable file not found") && stderr.contains(&self.shim.python))
        {
            return Ok(ShimStatus::Absent(Absence::InterpreterMissing));
        }
        Err(inconclusive(format!("probe failed with unrecognized output (exit {code})")))
    }
}
