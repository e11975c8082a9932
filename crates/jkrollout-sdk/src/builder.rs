//! Fluent API for describing a kernel to provision.

use std::path::PathBuf;

use jkrollout_common::error::Result;
use jkrollout_common::types::{ImageReference, KernelName, ResourceHint};

/// A validated provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    /// Image backing the kernel.
    pub image: ImageReference,
    /// Display name and derived slug.
    pub name: KernelName,
    /// Resource class.
    pub resource: ResourceHint,
    /// Replace an existing kernel with the same slug.
    pub force: bool,
    /// Overlay directory; derived from the image name when unset.
    pub overlay_dir: Option<PathBuf>,
}

/// Builder for a [`ProvisionRequest`].
#[derive(Debug)]
pub struct ProvisionRequestBuilder {
    image: PathBuf,
    display_name: String,
    resource: ResourceHint,
    force: bool,
    overlay_dir: Option<PathBuf>,
}

impl ProvisionRequestBuilder {
    /// Starts a request for `image` shown as `display_name`.
    #[must_use]
    pub fn new(image: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            display_name: display_name.into(),
            resource: ResourceHint::default(),
            force: false,
            overlay_dir: None,
        }
    }

    /// Sets the resource class.
    #[must_use]
    pub const fn resource(mut self, resource: ResourceHint) -> Self {
        self.resource = resource;
        self
    }

    /// Allows replacing an existing kernel with the same slug.
    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Overrides the overlay directory.
    #[must_use]
    pub fn overlay_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.overlay_dir = Some(dir.into());
        self
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidName`](jkrollout_common::error::ProvisionError::InvalidName)
    /// if the display name yields no usable slug.
    pub fn build(self) -> Result<ProvisionRequest> {
        Ok(ProvisionRequest {
            image: ImageReference::new(self.image),
            name: KernelName::new(self.display_name)?,
            resource: self.resource,
            force: self.force,
            overlay_dir: self.overlay_dir,
        })
    }
}
