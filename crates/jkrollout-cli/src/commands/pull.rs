//! `jkrollout2 pull` — fetch a remote image into a local file.

use std::path::PathBuf;

use clap::Args;
use jkrollout_runtime::pull::pull_image;

use super::Context;
use crate::output;

/// Arguments for the `pull` command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image source understood by the runtime (e.g. `docker://pytorch/pytorch:2.9.1`).
    pub source: String,

    /// Destination image file.
    pub image: PathBuf,

    /// Overwrite an existing image file.
    #[arg(long)]
    pub force: bool,
}

/// Executes the `pull` command.
///
/// # Errors
///
/// Returns an error if the destination exists without `--force` or the
/// pull fails.
pub fn execute(ctx: &Context, args: &PullArgs) -> anyhow::Result<()> {
    let runtime = ctx.runtime();
    let image = pull_image(
        &runtime,
        &args.source,
        &args.image,
        args.force,
        ctx.config.pull_timeout(),
    )?;
    output::emit(&output::pulled(image.path()), ctx.json);
    Ok(())
}
