//! Unified error types for the jkrollout workspace.
//!
//! Every provisioning step returns [`ProvisionError`]. Each variant belongs to
//! one failure category, and each category has its own process exit code so
//! automation calling the CLI can branch on the cause.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Exit code for a successful run.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for invalid input or configuration.
pub const EXIT_USAGE: u8 = 1;
/// Exit code when the kernel already exists and `--force` was not given.
pub const EXIT_CONFLICT: u8 = 2;
/// Exit code for runtime, detection, or install failures.
pub const EXIT_RUNTIME: u8 = 3;
/// Exit code for filesystem faults.
pub const EXIT_FILESYSTEM: u8 = 4;

/// Why an external runtime invocation did not succeed.
#[derive(Debug, Error)]
pub enum InvocationFailure {
    /// The runtime program could not be started.
    #[error("could not start: {0}")]
    Spawn(#[source] std::io::Error),

    /// The command ran and exited with a non-zero status.
    #[error("exited with status {code}")]
    Exit {
        /// Exit status reported by the process.
        code: i32,
    },

    /// The command was terminated by a signal.
    #[error("terminated by a signal")]
    Signal,

    /// The command exceeded its deadline and was killed.
    #[error("timed out after {secs}s")]
    TimedOut {
        /// Timeout that elapsed, in seconds.
        secs: u64,
    },
}

impl InvocationFailure {
    /// Returns the exit status when the command ran to completion.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code } => Some(*code),
            _ => None,
        }
    }

    /// Returns whether the command was killed by its deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Broad classification of a [`ProvisionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid user input or configuration.
    Usage,
    /// The kernel already exists.
    Conflict,
    /// External runtime, detection, or install failure.
    Runtime,
    /// Filesystem fault.
    Filesystem,
}

impl ErrorCategory {
    /// Returns the process exit code for this category.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Usage => EXIT_USAGE,
            Self::Conflict => EXIT_CONFLICT,
            Self::Runtime => EXIT_RUNTIME,
            Self::Filesystem => EXIT_FILESYSTEM,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage => write!(f, "usage"),
            Self::Conflict => write!(f, "conflict"),
            Self::Runtime => write!(f, "runtime"),
            Self::Filesystem => write!(f, "filesystem"),
        }
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// An external container runtime command failed or timed out.
    #[error("runtime invocation `{command}` failed: {reason}")]
    RuntimeInvocation {
        /// Rendered command line that was executed.
        command: String,
        /// What went wrong.
        #[source]
        reason: InvocationFailure,
        /// Captured standard error of the command.
        stderr: String,
    },

    /// The shim capability check was inconclusive.
    #[error("could not determine whether {image} provides the kernel shim: {message}")]
    Detection {
        /// Image that was probed.
        image: PathBuf,
        /// Classification of the inconclusive result.
        message: String,
        /// Captured diagnostic output of the probe.
        stderr: String,
    },

    /// The shim is still missing after an install attempt.
    #[error("kernel shim install into {overlay} could not be verified: {message}")]
    InstallVerification {
        /// Overlay directory the install targeted.
        overlay: PathBuf,
        /// Why verification failed.
        message: String,
        /// Captured output of the install command.
        logs: String,
    },

    /// A kernel with this slug already exists.
    #[error("kernel `{slug}` already exists at {path} (use --force to replace it)")]
    KernelConflict {
        /// Conflicting slug.
        slug: String,
        /// Existing kernel directory.
        path: PathBuf,
    },

    /// The overlay directory could not be created or is not writable.
    #[error("cannot prepare overlay directory {path}: {source}")]
    OverlayCreate {
        /// Overlay directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Writing the staged kernel directory failed.
    #[error("cannot write staged kernel files at {path}: {source}")]
    StagingWrite {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The staged directory could not be atomically published.
    #[error("cannot atomically move {from} to {to}: {source}")]
    Rename {
        /// Staging directory.
        from: PathBuf,
        /// Final kernel directory.
        to: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The container image does not exist or is unreadable.
    #[error("container image {path} is not readable: {source}")]
    ImageNotFound {
        /// Image path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A display name produced an unusable slug.
    #[error("invalid kernel name `{name}`: {message}")]
    InvalidName {
        /// Name as given by the user.
        name: String,
        /// Why it was rejected.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An I/O operation outside the staging/publication path failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl ProvisionError {
    /// Returns the failure category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::KernelConflict { .. } => ErrorCategory::Conflict,
            Self::RuntimeInvocation { .. }
            | Self::Detection { .. }
            | Self::InstallVerification { .. } => ErrorCategory::Runtime,
            Self::OverlayCreate { .. }
            | Self::StagingWrite { .. }
            | Self::Rename { .. }
            | Self::ImageNotFound { .. }
            | Self::Io { .. }
            | Self::Serialization { .. } => ErrorCategory::Filesystem,
            Self::InvalidName { .. } | Self::Config { .. } | Self::NotFound { .. } => {
                ErrorCategory::Usage
            }
        }
    }

    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.category().exit_code()
    }

    /// Returns a short machine-readable name for the error variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RuntimeInvocation { .. } => "RuntimeInvocationError",
            Self::Detection { .. } => "DetectionError",
            Self::InstallVerification { .. } => "InstallVerificationError",
            Self::KernelConflict { .. } => "KernelConflictError",
            Self::OverlayCreate { .. } => "OverlayCreateError",
            Self::StagingWrite { .. } => "StagingWriteError",
            Self::Rename { .. } => "RenameError",
            Self::ImageNotFound { .. } => "ImageNotFoundError",
            Self::InvalidName { .. } => "InvalidNameError",
            Self::Config { .. } => "ConfigError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Io { .. } => "IoError",
            Self::Serialization { .. } => "SerializationError",
        }
    }

    /// Returns captured output of the failing external command, if any.
    #[must_use]
    pub fn diagnostics(&self) -> Option<&str> {
        let text = match self {
            Self::RuntimeInvocation { stderr, .. } | Self::Detection { stderr, .. } => stderr,
            Self::InstallVerification { logs, .. } => logs,
            _ => return None,
        };
        let text = text.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ProvisionError>;
