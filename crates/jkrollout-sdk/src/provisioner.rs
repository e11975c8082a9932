//! End-to-end kernel provisioning.
//!
//! Steps run strictly in order and any failure aborts the run:
//! 1. check the image is readable and the slug is free (or `force` is set),
//! 2. resolve the overlay directory,
//! 3. make sure the image plus overlay exposes the kernel shim,
//! 4. stage and atomically publish the kernel spec.
//!
//! Nothing is written to the kernels directory before step 4, so a failed
//! probe or install never leaves a kernel behind.

use std::path::PathBuf;

use jkrollout_common::config::ProvisionerConfig;
use jkrollout_common::error::{ProvisionError, Result};
use jkrollout_common::types::{ImageReference, KernelSlug};
use jkrollout_kernelspec::catalog::KernelCatalog;
use jkrollout_kernelspec::writer::{KernelSpecRequest, KernelSpecWriter};
use jkrollout_runtime::invoker::ContainerRuntime;
use jkrollout_runtime::overlay::{InstallOutcome, OverlayInstaller};

use crate::builder::ProvisionRequest;

/// Result of a successful provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    /// Kernel slug.
    pub slug: KernelSlug,
    /// Published kernel directory.
    pub path: PathBuf,
    /// Overlay directory the kernel uses.
    pub overlay: PathBuf,
    /// What happened to the shim.
    pub outcome: InstallOutcome,
    /// Other managed kernels using the same overlay.
    pub shared_with: Vec<String>,
}

/// Provisions kernels using one runtime and configuration.
pub struct Provisioner<'a> {
    runtime: &'a dyn ContainerRuntime,
    config: &'a ProvisionerConfig,
}

impl<'a> Provisioner<'a> {
    /// Creates a provisioner.
    #[must_use]
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a ProvisionerConfig) -> Self {
        Self { runtime, config }
    }

    /// Provisions the kernel described by `request`.
    ///
    /// # Errors
    ///
    /// Propagates the first failure: [`ProvisionError::ImageNotFound`],
    /// [`ProvisionError::KernelConflict`], detection and install errors
    /// from the overlay installer, or staging and rename errors from the
    /// kernel spec writer.
    pub fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReport> {
        let slug = request.name.slug();
        let span = tracing::info_span!("provision", %slug, image = %request.image);
        let _enter = span.enter();

        // The launcher runs from the notebook's directory, not ours.
        let image = request.image.to_absolute()?;
        image.ensure_readable()?;
        let writer = KernelSpecWriter::new(self.config, self.runtime.program());
        writer.check_available(slug, request.force)?;

        let overlay = self.resolve_overlay(request, &image)?;
        let shared_with: Vec<String> = KernelCatalog::new(&self.config.kernels_dir)
            .sharing_overlay(&overlay, slug)?
            .into_iter()
            .map(|k| k.slug)
            .collect();
        if !shared_with.is_empty() {
            tracing::warn!(
                overlay = %overlay.display(),
                kernels = ?shared_with,
                "overlay is shared with other kernels"
            );
        }

        let outcome = OverlayInstaller::new(self.runtime, self.config)
            .ensure_shim(&image, &overlay)?;
        tracing::info!(version = outcome.version(), "kernel shim ready");

        let path = writer.write(&KernelSpecRequest {
            name: &request.name,
            image: &image,
            overlay: &overlay,
            resource: request.resource,
            force: request.force,
        })?;

        Ok(ProvisionReport {
            slug: slug.clone(),
            path,
            overlay,
            outcome,
            shared_with,
        })
    }

    /// Returns the absolute overlay directory for `request`.
    ///
    /// The launcher runs from an unrelated working directory, so relative
    /// paths are resolved here.
    fn resolve_overlay(
        &self,
        request: &ProvisionRequest,
        image: &ImageReference,
    ) -> Result<PathBuf> {
        let overlay = request
            .overlay_dir
            .clone()
            .unwrap_or_else(|| self.config.overlay_for(&image.base_name()));
        std::path::absolute(&overlay).map_err(|e| ProvisionError::OverlayCreate {
            path: overlay,
            source: e,
        })
    }
}
