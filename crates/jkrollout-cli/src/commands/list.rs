//! `jkrollout2 list` — show installed kernels.

use clap::Args;
use jkrollout_kernelspec::catalog::KernelCatalog;

use super::Context;
use crate::output;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show kernels created by this tool.
    #[arg(long)]
    pub managed: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if the kernels directory cannot be read.
pub fn execute(ctx: &Context, args: &ListArgs) -> anyhow::Result<()> {
    let catalog = KernelCatalog::new(&ctx.config.kernels_dir);
    let mut kernels = catalog.list()?;
    if args.managed {
        kernels.retain(jkrollout_kernelspec::catalog::InstalledKernel::is_managed);
    }
    output::emit(&output::kernel_table(catalog.root(), &kernels), ctx.json);
    Ok(())
}
