//! Scripted in-memory container runtime for tests.
//!
//! Probes report the shim as present when the image was built with it or
//! when a bound overlay contains the marker left by a successful fake
//! install, so idempotence can be exercised without a real runtime.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use jkrollout_common::error::{InvocationFailure, ProvisionError, Result};
use jkrollout_common::types::ImageReference;

use crate::invoker::{ContainerRuntime, ExecOptions, ExecOutput};

/// File a fake install drops into the overlay.
pub const SHIM_MARKER: &str = "fake-shim-installed";

/// Version reported by a present fake shim.
pub const FAKE_VERSION: &str = "6.29.5";

/// What a probe invocation does.
#[derive(Debug, Clone)]
pub enum ProbeBehavior {
    /// Present if built into the image or installed into a bound overlay.
    Scripted,
    /// Exit with the given code and stderr.
    Fail {
        /// Exit status.
        code: i32,
        /// Captured stderr.
        stderr: String,
    },
    /// Exceed the deadline.
    TimeOut,
}

/// What an install invocation does.
#[derive(Debug, Clone)]
pub enum InstallBehavior {
    /// Write the shim marker into every bound host directory.
    Install,
    /// Exit zero without installing anything.
    NoEffect,
    /// Exit with the given code and stderr.
    Fail {
        /// Exit status.
        code: i32,
        /// Captured stderr.
        stderr: String,
    },
}

/// Kind of a recorded invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Shim probe.
    Probe,
    /// Shim install.
    Install,
    /// Image pull.
    Pull,
    /// Anything else.
    Other,
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Classified kind.
    pub kind: CallKind,
    /// Image path, or the pull destination.
    pub image: PathBuf,
    /// Command run inside the image.
    pub command: Vec<String>,
    /// Options the call was made with.
    pub options: Option<ExecOptions>,
}

/// Scripted runtime recording every call it receives.
#[derive(Debug)]
pub struct FakeRuntime {
    shim_in_image: bool,
    probe: ProbeBehavior,
    install: InstallBehavior,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// Runtime whose images lack the shim and whose installs succeed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            shim_in_image: false,
            probe: ProbeBehavior::Scripted,
            install: InstallBehavior::Install,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Runtime whose images already ship the shim.
    #[must_use]
    pub fn with_shim_in_image() -> Self {
        let mut runtime = Self::new();
        runtime.shim_in_image = true;
        runtime
    }

    /// Overrides probe behavior.
    #[must_use]
    pub fn probe(mut self, behavior: ProbeBehavior) -> Self {
        self.probe = behavior;
        self
    }

    /// Overrides install behavior.
    #[must_use]
    pub fn install(mut self, behavior: InstallBehavior) -> Self {
        self.install = behavior;
        self
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns how many calls of `kind` were made.
    #[must_use]
    pub fn count(&self, kind: CallKind) -> usize {
        self.calls().iter().filter(|c| c.kind == kind).count()
    }

    fn record(&self, call: RecordedCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn classify(command: &[String]) -> CallKind {
        if command.iter().any(|a| a == "pip") {
            CallKind::Install
        } else if command.iter().any(|a| a.contains("import ")) {
            CallKind::Probe
        } else {
            CallKind::Other
        }
    }

    fn failure(command: &[String], reason: InvocationFailure, stderr: &str) -> ProvisionError {
        ProvisionError::RuntimeInvocation {
            command: format!("apptainer exec {}", command.join(" ")),
            reason,
            stderr: stderr.to_owned(),
        }
    }

    fn installed_in(options: &ExecOptions) -> bool {
        options
            .binds
            .iter()
            .any(|b| b.host.join(SHIM_MARKER).exists())
    }

    fn run_probe(&self, command: &[String], options: &ExecOptions) -> Result<ExecOutput> {
        match &self.probe {
            ProbeBehavior::Scripted if self.shim_in_image || Self::installed_in(options) => {
                Ok(ExecOutput {
                    stdout: FAKE_VERSION.into(),
                    ..ExecOutput::default()
                })
            }
            ProbeBehavior::Scripted => Err(Self::failure(
                command,
                InvocationFailure::Exit { code: 1 },
                "ModuleNotFoundError: No module named 'ipykernel'",
            )),
            ProbeBehavior::Fail { code, stderr } => Err(Self::failure(
                command,
                InvocationFailure::Exit { code: *code },
                stderr,
            )),
            ProbeBehavior::TimeOut => Err(Self::failure(
                command,
                InvocationFailure::TimedOut {
                    secs: options.timeout.as_secs(),
                },
                "",
            )),
        }
    }

    fn run_install(&self, command: &[String], options: &ExecOptions) -> Result<ExecOutput> {
        match &self.install {
            InstallBehavior::Install => {
                for bind in &options.binds {
                    std::fs::write(bind.host.join(SHIM_MARKER), FAKE_VERSION).map_err(|e| {
                        ProvisionError::Io {
                            path: bind.host.clone(),
                            source: e,
                        }
                    })?;
                }
                Ok(ExecOutput {
                    stdout: format!("Successfully installed ipykernel-{FAKE_VERSION}\n"),
                    ..ExecOutput::default()
                })
            }
            InstallBehavior::NoEffect => Ok(ExecOutput {
                stdout: "Requirement already satisfied\n".into(),
                ..ExecOutput::default()
            }),
            InstallBehavior::Fail { code, stderr } => Err(Self::failure(
                command,
                InvocationFailure::Exit { code: *code },
                stderr,
            )),
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn program(&self) -> &str {
        "apptainer"
    }

    fn execute(
        &self,
        image: &ImageReference,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput> {
        image.ensure_readable()?;
        let kind = Self::classify(command);
        self.record(RecordedCall {
            kind,
            image: image.path().to_path_buf(),
            command: command.to_vec(),
            options: Some(options.clone()),
        });
        match kind {
            CallKind::Probe => self.run_probe(command, options),
            CallKind::Install => self.run_install(command, options),
            CallKind::Pull | CallKind::Other => Ok(ExecOutput::default()),
        }
    }

    fn pull(&self, source: &str, destination: &Path, _timeout: Duration) -> Result<ExecOutput> {
        self.record(RecordedCall {
            kind: CallKind::Pull,
            image: destination.to_path_buf(),
            command: vec![source.to_owned()],
            options: None,
        });
        std::fs::write(destination, source.as_bytes()).map_err(|e| ProvisionError::Io {
            path: destination.to_path_buf(),
            source: e,
        })?;
        Ok(ExecOutput::default())
    }
}
