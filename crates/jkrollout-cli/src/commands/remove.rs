//! `jkrollout2 remove` — unpublish a kernel.

use clap::Args;
use jkrollout_common::types::KernelSlug;
use jkrollout_kernelspec::catalog::KernelCatalog;

use super::Context;
use crate::output;

/// Arguments for the `remove` command.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Kernel slug, as shown by `list`.
    pub slug: String,

    /// Also remove kernels not created by this tool.
    #[arg(long)]
    pub force: bool,
}

/// Executes the `remove` command.
///
/// The kernel's overlay directory is left in place so other kernels using
/// the same image keep working.
///
/// # Errors
///
/// Returns an error if the kernel does not exist, is unmanaged without
/// `--force`, or cannot be moved aside.
pub fn execute(ctx: &Context, args: &RemoveArgs) -> anyhow::Result<()> {
    let slug = KernelSlug::parse(&args.slug)?;
    let path = KernelCatalog::new(&ctx.config.kernels_dir).remove(&slug, args.force)?;
    output::emit(&output::removed(slug.as_str(), &path), ctx.json);
    Ok(())
}
