//! Host-side overlay directories holding the kernel shim.
//!
//! An overlay is bound into the container at the configured site
//! directory and activated through `PYTHONUSERBASE`, so a user-level
//! package install inside the container lands on the host without
//! touching the image. Installs are idempotent: the shim is probed first
//! and installed only when recognizably absent, and every install is
//! verified by probing again.

use std::path::Path;
use std::time::Duration;

use jkrollout_common::config::{ProvisionerConfig, ShimConfig};
use jkrollout_common::constants::OVERLAY_STATE_DIR;
use jkrollout_common::error::{ProvisionError, Result};
use jkrollout_common::types::{Bind, ImageReference};

use crate::detect::{Absence, CapabilityDetector, ShimStatus};
use crate::invoker::{ContainerRuntime, ExecOptions};
use crate::logs;

/// Environment variable that points user-level installs at the overlay.
pub const USER_BASE_ENV: &str = "PYTHONUSERBASE";

/// Builds exec options that expose `overlay` (when given) at `site_dir`.
#[must_use]
pub fn site_options(overlay: Option<&Path>, site_dir: &str, timeout: Duration) -> ExecOptions {
    let options = ExecOptions::new(timeout);
    match overlay {
        Some(dir) => options
            .bind(Bind::new(dir, site_dir))
            .env(USER_BASE_ENV, site_dir),
        None => options,
    }
}

/// What [`OverlayInstaller::ensure_shim`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The shim was already available; nothing was installed.
    AlreadyPresent {
        /// Detected shim version.
        version: String,
    },
    /// The shim was installed into the overlay and verified.
    Installed {
        /// Verified shim version.
        version: String,
    },
}

impl InstallOutcome {
    /// Returns the shim version.
    #[must_use]
    pub fn version(&self) -> &str {
        match self {
            Self::AlreadyPresent { version } | Self::Installed { version } => version,
        }
    }
}

/// Installs the kernel shim into overlay directories.
pub struct OverlayInstaller<'a> {
    runtime: &'a dyn ContainerRuntime,
    detector: CapabilityDetector<'a>,
    shim: &'a ShimConfig,
    site_dir: &'a str,
    timeout: Duration,
}

impl<'a> OverlayInstaller<'a> {
    /// Creates an installer using the shim settings from `config`.
    #[must_use]
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a ProvisionerConfig) -> Self {
        Self {
            runtime,
            detector: CapabilityDetector::new(runtime, config),
            shim: &config.shim,
            site_dir: &config.container_site_dir,
            timeout: config.install_timeout(),
        }
    }

    /// Returns the install command run inside the image.
    #[must_use]
    pub fn install_command(&self) -> Vec<String> {
        vec![
            self.shim.python.clone(),
            "-m".into(),
            "pip".into(),
            "install".into(),
            "--user".into(),
            "--no-cache-dir".into(),
            "--no-warn-script-location".into(),
            "--disable-pip-version-check".into(),
            self.shim.package.clone(),
        ]
    }

    /// Makes sure `image` can start the shim, installing it into
    /// `overlay_dir` when absent.
    ///
    /// The overlay directory exists afterwards in every successful case,
    /// since the launcher always binds it.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::Detection`] if a probe is inconclusive.
    /// - [`ProvisionError::OverlayCreate`] if the overlay cannot be created
    ///   or written.
    /// - [`ProvisionError::RuntimeInvocation`] if the install command fails
    ///   or times out.
    /// - [`ProvisionError::InstallVerification`] if the shim is still absent
    ///   after installing, or the image has no usable interpreter or
    ///   package manager.
    pub fn ensure_shim(&self, image: &ImageReference, overlay_dir: &Path) -> Result<InstallOutcome> {
        let existing = overlay_dir.is_dir().then_some(overlay_dir);
        let absence = match self.detector.detect(image, existing)? {
            ShimStatus::Present { version } => {
                tracing::info!(image = %image, version = %version, "shim already present, skipping install");
                prepare_overlay(overlay_dir)?;
                return Ok(InstallOutcome::AlreadyPresent { version });
            }
            ShimStatus::Absent(absence) => absence,
        };

        prepare_overlay(overlay_dir)?;
        let install_output = self.run_install(image, overlay_dir, absence)?;

        match self.detector.detect(image, Some(overlay_dir))? {
            ShimStatus::Present { version } => {
                record(overlay_dir, "verified", &format!("{} {version}", self.shim.module));
                tracing::info!(image = %image, overlay = %overlay_dir.display(), version = %version, "shim installed");
                Ok(InstallOutcome::Installed { version })
            }
            ShimStatus::Absent(_) => {
                record(overlay_dir, "verification failed", "");
                Err(ProvisionError::InstallVerification {
                    overlay: overlay_dir.to_path_buf(),
                    message: format!(
                        "`{}` still cannot be imported after installing `{}`",
                        self.shim.module, self.shim.package
                    ),
                    logs: install_trail(overlay_dir, install_output),
                })
            }
        }
    }

    /// Runs the install command and returns its combined output.
    fn run_install(
        &self,
        image: &ImageReference,
        overlay_dir: &Path,
        absence: Absence,
    ) -> Result<String> {
        let command = self.install_command();
        let title = format!("install {} into {}", self.shim.package, image);
        tracing::info!(image = %image, overlay = %overlay_dir.display(), "installing shim");

        let options = site_options(Some(overlay_dir), self.site_dir, self.timeout);
        match self.runtime.execute(image, &command, &options) {
            Ok(out) => {
                let combined = format!("{}{}", out.stdout, out.stderr);
                record(overlay_dir, &title, &combined);
                Ok(combined)
            }
            Err(ProvisionError::RuntimeInvocation {
                command,
                reason,
                stderr,
            }) => {
                record(overlay_dir, &format!("{title} failed: {reason}"), &stderr);
                let unusable = reason.exit_code().is_some_and(|code| {
                    code == 127
                        || absence == Absence::InterpreterMissing
                        || stderr.contains("No module named pip")
                });
                if unusable {
                    return Err(ProvisionError::InstallVerification {
                        overlay: overlay_dir.to_path_buf(),
                        message: format!(
                            "image has no usable `{} -m pip`; the shim cannot be installed",
                            self.shim.python
                        ),
                        logs: stderr,
                    });
                }
                Err(ProvisionError::RuntimeInvocation {
                    command,
                    reason,
                    stderr,
                })
            }
            Err(other) => Err(other),
        }
    }
}

/// Appends to the overlay's install log. A failed write is only logged.
fn record(overlay_dir: &Path, title: &str, body: &str) {
    if let Err(e) = logs::append_log(overlay_dir, title, body) {
        tracing::warn!(overlay = %overlay_dir.display(), error = %e, "could not write install log");
    }
}

/// Returns the overlay's install log, or `fallback` when it is unreadable
/// or empty.
fn install_trail(overlay_dir: &Path, fallback: String) -> String {
    match logs::read_logs(overlay_dir) {
        Ok(trail) if !trail.is_empty() => trail,
        Ok(_) => fallback,
        Err(e) => {
            tracing::warn!(overlay = %overlay_dir.display(), error = %e, "could not read install log");
            fallback
        }
    }
}

/// Creates the overlay directory and checks that it is writable.
///
/// # Errors
///
/// Returns [`ProvisionError::OverlayCreate`] on any failure.
pub fn prepare_overlay(overlay_dir: &Path) -> Result<()> {
    let fail = |source| ProvisionError::OverlayCreate {
        path: overlay_dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(overlay_dir.join(OVERLAY_STATE_DIR)).map_err(fail)?;
    let _probe = tempfile::tempfile_in(overlay_dir).map_err(fail)?;
    tracing::debug!(overlay = %overlay_dir.display(), "overlay ready");
    Ok(())
}
