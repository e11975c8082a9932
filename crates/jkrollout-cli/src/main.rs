//! # jkrollout2
//!
//! Provisions Jupyter kernels backed by Apptainer images.
//! Single binary for provisioning, listing, and removing kernels and for
//! pulling images.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use jkrollout_common::error::{EXIT_SUCCESS, EXIT_USAGE};
use tracing_subscriber::EnvFilter;

use crate::commands::{Cli, LogFormat};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "JKROLLOUT_LOG";

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS });
        }
    };
    init_tracing(cli.log_format);

    let json = cli.json;
    match commands::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => ExitCode::from(output::error(&err, json)),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
