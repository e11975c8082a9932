//! Domain primitive types used across the jkrollout workspace.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// A container image already materialized on the host (e.g. a `.sif` file).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference(PathBuf);

impl ImageReference {
    /// Creates an image reference from a host path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Returns the host path of the image.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Returns the image file name without its directory or image extension.
    ///
    /// `~/pytorch-2.9.1.sif` yields `pytorch-2.9.1`.
    #[must_use]
    pub fn base_name(&self) -> String {
        let Some(file_name) = self.0.file_name() else {
            return String::from("image");
        };
        let file_name = file_name.to_string_lossy();
        let stripped = self
            .0
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| {
                crate::constants::IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .and_then(|ext| file_name.strip_suffix(ext))
            .and_then(|rest| rest.strip_suffix('.'));
        stripped.unwrap_or(&file_name).to_owned()
    }

    /// Returns this reference with the path made absolute against the
    /// current directory. Symlinks are kept as given.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ImageNotFound`] if the current directory
    /// cannot be determined.
    pub fn to_absolute(&self) -> Result<Self> {
        std::path::absolute(&self.0)
            .map(Self)
            .map_err(|source| ProvisionError::ImageNotFound {
                path: self.0.clone(),
                source,
            })
    }

    /// Verifies that the image exists and can be opened for reading.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ImageNotFound`] if the file is missing,
    /// is a directory, or cannot be opened.
    pub fn ensure_readable(&self) -> Result<()> {
        let not_found = |source| ProvisionError::ImageNotFound {
            path: self.0.clone(),
            source,
        };
        let meta = std::fs::metadata(&self.0).map_err(not_found)?;
        if meta.is_dir() {
            // Sandbox images are directories; only files are supported here.
            return Err(not_found(std::io::Error::other("path is a directory")));
        }
        let _file = std::fs::File::open(&self.0).map_err(not_found)?;
        Ok(())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Filesystem-safe unique identifier of a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelSlug(String);

impl KernelSlug {
    /// Derives a slug from a display name.
    ///
    /// Lowercases ASCII letters, replaces every run of non-alphanumeric
    /// characters with a single `-`, and trims dashes at both ends.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidName`] if nothing alphanumeric remains.
    pub fn from_display_name(name: &str) -> Result<Self> {
        let mut slug = String::with_capacity(name.len());
        let mut pending_dash = false;
        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }
        if slug.is_empty() {
            return Err(ProvisionError::InvalidName {
                name: name.to_owned(),
                message: "name must contain at least one ASCII letter or digit".into(),
            });
        }
        Ok(Self(slug))
    }

    /// Parses an already-derived slug, rejecting anything not in canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidName`] if the slug would change when
    /// re-derived.
    pub fn parse(slug: &str) -> Result<Self> {
        let derived = Self::from_display_name(slug)?;
        if derived.0 != slug {
            return Err(ProvisionError::InvalidName {
                name: slug.to_owned(),
                message: format!("not a valid slug (did you mean `{derived}`?)"),
            });
        }
        Ok(derived)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KernelSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display label of a kernel paired with its derived slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelName {
    display: String,
    slug: KernelSlug,
}

impl KernelName {
    /// Creates a kernel name, deriving the slug from the display label.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidName`] if the label is blank or
    /// yields an empty slug.
    pub fn new(display: impl Into<String>) -> Result<Self> {
        let display = display.into();
        let trimmed = display.trim();
        if trimmed.is_empty() {
            return Err(ProvisionError::InvalidName {
                name: display,
                message: "display name is empty".into(),
            });
        }
        let slug = KernelSlug::from_display_name(trimmed)?;
        Ok(Self {
            display: trimmed.to_owned(),
            slug,
        })
    }

    /// Returns the human-readable label.
    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Returns the derived slug.
    #[must_use]
    pub const fn slug(&self) -> &KernelSlug {
        &self.slug
    }
}

/// Resource class a kernel is provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceHint {
    /// CPU only.
    #[default]
    Cpu,
    /// GPU passthrough enabled.
    Gpu,
}

impl ResourceHint {
    /// Returns whether GPU passthrough should be requested.
    #[must_use]
    pub const fn uses_gpu(self) -> bool {
        matches!(self, Self::Gpu)
    }
}

impl FromStr for ResourceHint {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            other => Err(ProvisionError::Config {
                message: format!("unknown resource hint `{other}` (expected `gpu` or `cpu`)"),
            }),
        }
    }
}

impl fmt::Display for ResourceHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

/// A host path bound to a path inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    /// Host-side path.
    pub host: PathBuf,
    /// Container-side mount point.
    pub container: String,
}

impl Bind {
    /// Creates a bind pair.
    #[must_use]
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    /// Renders the pair in the runtime's `src:dst` form.
    #[must_use]
    pub fn to_spec(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}
