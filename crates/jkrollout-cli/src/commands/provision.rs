//! `jkrollout2 provision` — make an image usable as a Jupyter kernel.

use std::path::PathBuf;

use clap::Args;
use jkrollout_common::types::ResourceHint;
use jkrollout_sdk::builder::ProvisionRequestBuilder;
use jkrollout_sdk::provisioner::Provisioner;

use super::Context;
use crate::output;

/// Arguments for the `provision` command.
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Container image file (e.g. pytorch-2.9.1.sif).
    pub image: PathBuf,

    /// Display name shown in the kernel picker.
    pub name: String,

    /// Resource class: `gpu` or `cpu`.
    pub resource: ResourceHint,

    /// Replace an existing kernel with the same slug.
    #[arg(long)]
    pub force: bool,

    /// Overlay directory (default: derived from the image file name).
    #[arg(long)]
    pub overlay: Option<PathBuf>,
}

/// Executes the `provision` command.
///
/// Prints the published kernel directory.
///
/// # Errors
///
/// Returns an error if any provisioning step fails.
pub fn execute(ctx: &Context, args: ProvisionArgs) -> anyhow::Result<()> {
    let mut builder = ProvisionRequestBuilder::new(args.image, args.name)
        .resource(args.resource)
        .force(args.force);
    if let Some(dir) = args.overlay {
        builder = builder.overlay_dir(dir);
    }
    let request = builder.build()?;

    let runtime = ctx.runtime();
    let report = Provisioner::new(&runtime, &ctx.config).provision(&request)?;
    output::emit(&output::provisioned(&report), ctx.json);
    Ok(())
}
