//! System-wide constants and default paths.

use std::path::PathBuf;

/// Application name used in log output and kernel metadata.
pub const APP_NAME: &str = "jkrollout";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "jkrollout2";

/// Name of the per-user data directory under `$HOME`.
pub const DATA_DIR_NAME: &str = ".jkrollout";

/// File name of the optional configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// File name of the kernel descriptor consumed by Jupyter front ends.
pub const KERNEL_JSON: &str = "kernel.json";

/// File name of the generated launcher script inside a kernel directory.
pub const LAUNCHER_NAME: &str = "launcher.sh";

/// Placeholder the front end replaces with the connection file path.
pub const CONNECTION_FILE_PLACEHOLDER: &str = "{connection_file}";

/// Key under the descriptor's `metadata` object that marks managed kernels.
pub const METADATA_KEY: &str = "jkrollout";

/// Hidden bookkeeping directory created inside each overlay.
pub const OVERLAY_STATE_DIR: &str = ".jkrollout";

/// Default container runtime program.
pub const DEFAULT_RUNTIME: &str = "apptainer";

/// Legacy name of the container runtime, tried when the default is absent.
pub const LEGACY_RUNTIME: &str = "singularity";

/// Default container path the overlay directory is bound to.
pub const DEFAULT_CONTAINER_SITE_DIR: &str = "/opt/jkrollout/site";

/// Default timeout for capability detection, in seconds.
pub const DEFAULT_DETECT_TIMEOUT_SECS: u64 = 120;

/// Default timeout for shim installation, in seconds.
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 900;

/// Default timeout for image pulls, in seconds.
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 3600;

/// Image file extensions stripped when deriving an image's base name.
pub const IMAGE_EXTENSIONS: &[&str] = &["sif", "simg", "img"];

/// Returns the current user's home directory, if known.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Returns the jkrollout data directory (`$HOME/.jkrollout`).
///
/// Falls back to a relative `.jkrollout` when no home directory is set.
pub fn data_dir() -> PathBuf {
    home_dir().map_or_else(|| PathBuf::from(DATA_DIR_NAME), |h| h.join(DATA_DIR_NAME))
}

/// Returns the default configuration file path.
pub fn default_config_file() -> PathBuf {
    data_dir().join(CONFIG_FILE_NAME)
}

/// Returns the default root directory holding per-image overlays.
pub fn default_overlay_root() -> PathBuf {
    data_dir().join("overlays")
}

/// Returns the per-user Jupyter kernel directory.
///
/// Honors `JUPYTER_DATA_DIR`, then `XDG_DATA_HOME`, then the platform
/// default under the home directory.
pub fn default_kernels_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("JUPYTER_DATA_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("kernels");
    }
    if cfg!(target_os = "macos") {
        return home_dir()
            .unwrap_or_default()
            .join("Library")
            .join("Jupyter")
            .join("kernels");
    }
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("jupyter").join("kernels");
    }
    home_dir()
        .unwrap_or_default()
        .join(".local")
        .join("share")
        .join("jupyter")
        .join("kernels")
}
