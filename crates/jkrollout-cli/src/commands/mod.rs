//! CLI command definitions and dispatch.

pub mod list;
pub mod provision;
pub mod pull;
pub mod remove;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use jkrollout_common::config::ProvisionerConfig;
use jkrollout_runtime::invoker::ApptainerRuntime;

/// jkrollout2 — provision Jupyter kernels backed by container images.
#[derive(Parser, Debug)]
#[command(name = "jkrollout2", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (default: ~/.jkrollout/config.json).
    #[arg(long, global = true, env = "JKROLLOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory Jupyter scans for kernel specs.
    #[arg(long, global = true, env = "JKROLLOUT_KERNELS_DIR")]
    pub kernels_dir: Option<PathBuf>,

    /// Container runtime program.
    #[arg(long, global = true, env = "JKROLLOUT_RUNTIME")]
    pub runtime: Option<String>,

    /// Print results and errors as JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install the kernel shim if needed and publish a kernel spec.
    Provision(provision::ProvisionArgs),
    /// List installed kernels.
    List(list::ListArgs),
    /// Remove a kernel spec (its overlay is kept).
    Remove(remove::RemoveArgs),
    /// Pull a remote image to a local image file.
    Pull(pull::PullArgs),
}

/// Options shared by every command after configuration is resolved.
#[derive(Debug)]
pub struct Context {
    /// Effective configuration.
    pub config: ProvisionerConfig,
    /// Emit JSON instead of text.
    pub json: bool,
}

impl Context {
    /// Loads the configuration file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = ProvisionerConfig::load(cli.config.as_deref())?;
        if let Some(dir) = &cli.kernels_dir {
            config.kernels_dir.clone_from(dir);
        }
        if let Some(runtime) = &cli.runtime {
            config.runtime.clone_from(runtime);
        }
        config.validate()?;
        tracing::debug!(
            kernels_dir = %config.kernels_dir.display(),
            runtime = %config.runtime,
            "configuration resolved"
        );
        Ok(Self {
            config,
            json: cli.json,
        })
    }

    /// Returns the container runtime named by the configuration.
    #[must_use]
    pub fn runtime(&self) -> ApptainerRuntime {
        ApptainerRuntime::detect(&self.config.runtime)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::from_cli(&cli)?;
    match cli.command {
        Command::Provision(args) => provision::execute(&ctx, args),
        Command::List(args) => list::execute(&ctx, &args),
        Command::Remove(args) => remove::execute(&ctx, &args),
        Command::Pull(args) => pull::execute(&ctx, &args),
    }
}
