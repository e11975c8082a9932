//! Configuration model for the kernel provisioner.
//!
//! Every field has a default, so a partial JSON file only overrides what
//! it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{ProvisionError, Result};

/// How the kernel shim is probed for, installed, and launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Interpreter inside the image.
    pub python: String,
    /// Package name passed to the package manager.
    pub package: String,
    /// Importable module name used for detection.
    pub module: String,
    /// Module run by the launcher to start the kernel.
    pub launcher_module: String,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            package: "ipykernel".into(),
            module: "ipykernel".into(),
            launcher_module: "ipykernel_launcher".into(),
        }
    }
}

/// Root configuration for the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Per-user directory the front end scans for kernel specs.
    pub kernels_dir: PathBuf,
    /// Directory holding one overlay per image base name.
    pub overlay_root: PathBuf,
    /// Container runtime program.
    pub runtime: String,
    /// Host environment modules loaded by generated launchers.
    pub modules: Vec<String>,
    /// Shell lines run by GPU launchers before the container starts.
    pub gpu_prep: Vec<String>,
    /// Shim settings.
    pub shim: ShimConfig,
    /// Container path the overlay directory is bound to.
    pub container_site_dir: String,
    /// Language tag written to the kernel descriptor.
    pub language: String,
    /// Deadline for a single capability probe, in seconds.
    pub detect_timeout_secs: u64,
    /// Deadline for the shim install command, in seconds.
    pub install_timeout_secs: u64,
    /// Deadline for an image pull, in seconds.
    pub pull_timeout_secs: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            kernels_dir: constants::default_kernels_dir(),
            overlay_root: constants::default_overlay_root(),
            runtime: constants::DEFAULT_RUNTIME.into(),
            modules: vec![constants::DEFAULT_RUNTIME.into()],
            gpu_prep: vec![
                "nvidia-smi -L >/dev/null 2>&1 || echo \"warning: no NVIDIA GPU visible on $(hostname)\" >&2"
                    .into(),
            ],
            shim: ShimConfig::default(),
            container_site_dir: constants::DEFAULT_CONTAINER_SITE_DIR.into(),
            language: "python".into(),
            detect_timeout_secs: constants::DEFAULT_DETECT_TIMEOUT_SECS,
            install_timeout_secs: constants::DEFAULT_INSTALL_TIMEOUT_SECS,
            pull_timeout_secs: constants::DEFAULT_PULL_TIMEOUT_SECS,
        }
    }
}

impl ProvisionerConfig {
    /// Loads configuration from a JSON file.
    ///
    /// When `path` is `None` the default file is read if it exists and
    /// built-in defaults are used otherwise. An explicitly named file must
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, a file cannot be
    /// read or parsed, or the result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (constants::default_config_file(), false),
        };
        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ProvisionError::Io {
            path: path.clone(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ProvisionError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would produce a broken launcher or probe.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        let bad = |message: String| Err(ProvisionError::Config { message });
        if self.runtime.trim().is_empty() {
            return bad("`runtime` must not be empty".into());
        }
        if !self.container_site_dir.starts_with('/') {
            return bad(format!(
                "`container_site_dir` must be absolute, got `{}`",
                self.container_site_dir
            ));
        }
        if self.shim.python.trim().is_empty() || self.shim.package.trim().is_empty() {
            return bad("`shim.python` and `shim.package` must not be empty".into());
        }
        if self.detect_timeout_secs == 0 || self.install_timeout_secs == 0 {
            return bad("timeouts must be at least one second".into());
        }
        Ok(())
    }

    /// Returns the default overlay directory for an image base name.
    #[must_use]
    pub fn overlay_for(&self, image_base_name: &str) -> PathBuf {
        self.overlay_root.join(image_base_name)
    }

    /// Returns the capability probe deadline.
    #[must_use]
    pub const fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_timeout_secs)
    }

    /// Returns the install deadline.
    #[must_use]
    pub const fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    /// Returns the pull deadline.
    #[must_use]
    pub const fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}
