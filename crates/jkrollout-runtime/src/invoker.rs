//! Pass-through invocation of the container runtime.
//!
//! The invoker never interprets what the command does. It renders the
//! runtime command line, runs it under a hard deadline, and reports a
//! non-zero exit, a signal, or a timeout as
//! [`ProvisionError::RuntimeInvocation`] carrying the captured stderr.

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use jkrollout_common::error::{InvocationFailure, ProvisionError, Result};
use jkrollout_common::types::{Bind, ImageReference};

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Output from a successful runtime command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command.
    pub exit_code: i32,
}

/// Options applied to a single `exec` inside an image.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Host paths bound into the container.
    pub binds: Vec<Bind>,
    /// Environment variables set inside the container.
    pub env: Vec<(String, String)>,
    /// Whether GPU passthrough is requested.
    pub use_gpu: bool,
    /// Hard deadline for the whole invocation.
    pub timeout: Duration,
}

impl ExecOptions {
    /// Creates options with no binds, no environment, and no GPU.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            binds: Vec::new(),
            env: Vec::new(),
            use_gpu: false,
            timeout,
        }
    }

    /// Adds a bind pair.
    #[must_use]
    pub fn bind(mut self, bind: Bind) -> Self {
        self.binds.push(bind);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets GPU passthrough.
    #[must_use]
    pub const fn gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }
}

/// A container runtime capable of executing commands inside images.
///
/// Implementors must surface every unsuccessful command as an error; an
/// `Ok` result always means exit status zero.
pub trait ContainerRuntime: Send + Sync {
    /// Program name written into generated launchers.
    fn program(&self) -> &str;

    /// Runs `command` inside `image`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ImageNotFound`] for a missing image,
    /// [`ProvisionError::Io`] if a bind source cannot be created, and
    /// [`ProvisionError::RuntimeInvocation`] if the command cannot be
    /// started, fails, or times out.
    fn execute(
        &self,
        image: &ImageReference,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput>;

    /// Materializes `source` as an image file at `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::RuntimeInvocation`] if the pull fails or
    /// times out.
    fn pull(&self, source: &str, destination: &Path, timeout: Duration) -> Result<ExecOutput>;
}

/// Apptainer (or Singularity) command-line runtime.
#[derive(Debug, Clone)]
pub struct ApptainerRuntime {
    program: PathBuf,
    name: String,
}

impl ApptainerRuntime {
    /// Creates a runtime that invokes `program` directly.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program.file_name().map_or_else(
            || program.to_string_lossy().into_owned(),
            |n| n.to_string_lossy().into_owned(),
        );
        Self { program, name }
    }

    /// Resolves the configured runtime on `PATH`.
    ///
    /// Falls back to the legacy `singularity` name when the default
    /// `apptainer` is not installed. If nothing resolves, the configured
    /// name is kept and the failure surfaces on first use.
    #[must_use]
    pub fn detect(configured: &str) -> Self {
        if let Ok(path) = which::which(configured) {
            tracing::debug!(runtime = %path.display(), "resolved container runtime");
            let mut runtime = Self::new(path);
            configured.clone_into(&mut runtime.name);
            return runtime;
        }
        if configured == jkrollout_common::constants::DEFAULT_RUNTIME {
            let legacy = jkrollout_common::constants::LEGACY_RUNTIME;
            if let Ok(path) = which::which(legacy) {
                tracing::info!(runtime = %path.display(), "apptainer not found, using singularity");
                let mut runtime = Self::new(path);
                legacy.clone_into(&mut runtime.name);
                return runtime;
            }
        }
        tracing::warn!(runtime = configured, "container runtime not found on PATH");
        Self::new(configured)
    }

    /// Builds the argument list for `exec`, excluding the program itself.
    #[must_use]
    pub fn exec_args(
        image: &ImageReference,
        command: &[String],
        options: &ExecOptions,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["exec".into()];
        if options.use_gpu {
            args.push("--nv".into());
        }
        for bind in &options.binds {
            args.push("--bind".into());
            args.push(bind.to_spec().into());
        }
        for (key, value) in &options.env {
            args.push("--env".into());
            args.push(format!("{key}={value}").into());
        }
        args.push(image.path().as_os_str().to_owned());
        args.extend(command.iter().map(OsString::from));
        args
    }
}

impl ContainerRuntime for ApptainerRuntime {
    fn program(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        image: &ImageReference,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput> {
        image.ensure_readable()?;
        for bind in &options.binds {
            if !bind.host.exists() {
                std::fs::create_dir_all(&bind.host).map_err(|e| ProvisionError::Io {
                    path: bind.host.clone(),
                    source: e,
                })?;
            }
        }
        let mut cmd = Command::new(&self.program);
        let _ = cmd.args(Self::exec_args(image, command, options));
        tracing::debug!(image = %image, cmd = ?command, gpu = options.use_gpu, "runtime exec");
        run_with_timeout(cmd, options.timeout)
    }

    fn pull(&self, source: &str, destination: &Path, timeout: Duration) -> Result<ExecOutput> {
        let mut cmd = Command::new(&self.program);
        let _ = cmd.arg("pull").arg(destination).arg(source);
        tracing::info!(source, destination = %destination.display(), "runtime pull");
        run_with_timeout(cmd, timeout)
    }
}

/// Renders a command line for diagnostics, shell-quoting each word.
#[must_use]
pub fn render_command(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(quote_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_word(word: &OsStr) -> String {
    let word = word.to_string_lossy();
    shlex::try_quote(&word).map_or_else(|_| word.to_string(), |q| q.into_owned())
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Copies a pipe into a shared buffer on a background thread.
///
/// Both pipes are drained concurrently with the exit poll so a chatty child
/// cannot block on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> (SharedBuffer, Option<JoinHandle<()>>) {
    let buffer = SharedBuffer::default();
    let Some(mut pipe) = pipe else {
        return (buffer, None);
    };
    let sink = Arc::clone(&buffer);
    let handle = std::thread::spawn(move || {
        let mut chunk = [0_u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buffer, Some(handle))
}

fn snapshot(buffer: &SharedBuffer) -> String {
    String::from_utf8_lossy(&buffer.lock().unwrap_or_else(PoisonError::into_inner)).into_owned()
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "kill after deadline failed");
    }
    if let Err(e) = child.wait() {
        tracing::debug!(error = %e, "reap after deadline failed");
    }
}

/// Runs a command to completion or until `timeout` elapses.
///
/// On timeout the child is killed and reaped, and whatever stderr it
/// produced so far is attached to the error. Reader threads are not joined
/// in that case, since a grandchild may still hold the pipes open.
///
/// # Errors
///
/// Returns [`ProvisionError::RuntimeInvocation`] if the command cannot be
/// spawned, exits non-zero, is killed by a signal, or times out.
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<ExecOutput> {
    let rendered = render_command(&command);
    let failure = |reason, stderr| ProvisionError::RuntimeInvocation {
        command: rendered.clone(),
        reason,
        stderr,
    };

    let _ = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|e| failure(InvocationFailure::Spawn(e), String::new()))?;

    let (stdout_buf, stdout_thread) = drain(child.stdout.take());
    let (stderr_buf, stderr_thread) = drain(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                kill_and_reap(&mut child);
                tracing::warn!(cmd = %rendered, secs = timeout.as_secs(), "runtime command timed out");
                return Err(failure(
                    InvocationFailure::TimedOut {
                        secs: timeout.as_secs(),
                    },
                    snapshot(&stderr_buf),
                ));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(failure(InvocationFailure::Spawn(e), snapshot(&stderr_buf)));
            }
        }
    };

    for handle in [stdout_thread, stderr_thread].into_iter().flatten() {
        if handle.join().is_err() {
            tracing::debug!("pipe reader thread panicked");
        }
    }
    let stdout = snapshot(&stdout_buf);
    let stderr = snapshot(&stderr_buf);

    match status.code() {
        Some(0) => Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: 0,
        }),
        Some(code) => Err(failure(InvocationFailure::Exit { code }, stderr)),
        None => Err(failure(InvocationFailure::Signal, stderr)),
    }
}
