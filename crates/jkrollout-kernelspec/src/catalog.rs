//! Read-side view of the kernels directory.

use std::path::{Path, PathBuf};

use jkrollout_common::constants::KERNEL_JSON;
use jkrollout_common::error::{ProvisionError, Result};
use jkrollout_common::types::KernelSlug;

use crate::descriptor::{KernelDescriptor, ProvisionRecord};

/// A kernel found in the kernels directory.
#[derive(Debug, Clone)]
pub struct InstalledKernel {
    /// Directory name.
    pub slug: String,
    /// Kernel directory.
    pub path: PathBuf,
    /// Parsed `kernel.json`.
    pub descriptor: KernelDescriptor,
}

impl InstalledKernel {
    /// Returns the provisioning record if this tool wrote the kernel.
    #[must_use]
    pub const fn record(&self) -> Option<&ProvisionRecord> {
        self.descriptor.record()
    }

    /// Returns whether this tool manages the kernel.
    #[must_use]
    pub const fn is_managed(&self) -> bool {
        self.record().is_some()
    }
}

/// Kernels directory scanner.
#[derive(Debug, Clone)]
pub struct KernelCatalog {
    root: PathBuf,
}

impl KernelCatalog {
    /// Creates a catalog over `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the kernels directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists kernels sorted by slug.
    ///
    /// Hidden entries (including staging directories), directories without a
    /// `kernel.json`, and descriptors that fail to parse are skipped. A
    /// missing kernels directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<InstalledKernel>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut kernels = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.io_err(e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let spec = path.join(KERNEL_JSON);
            if !spec.is_file() {
                continue;
            }
            match KernelDescriptor::read(&spec) {
                Ok(descriptor) => kernels.push(InstalledKernel {
                    slug: name,
                    path,
                    descriptor,
                }),
                Err(e) => tracing::warn!(path = %spec.display(), error = %e, "skipping unreadable kernel spec"),
            }
        }
        kernels.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(kernels)
    }

    /// Returns the kernel named `slug`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] if no such kernel exists, or an
    /// error if its descriptor cannot be read.
    pub fn get(&self, slug: &KernelSlug) -> Result<InstalledKernel> {
        let path = self.root.join(slug.as_str());
        let spec = path.join(KERNEL_JSON);
        if !spec.is_file() {
            return Err(ProvisionError::NotFound {
                kind: "kernel",
                id: slug.to_string(),
            });
        }
        Ok(InstalledKernel {
            slug: slug.to_string(),
            descriptor: KernelDescriptor::read(&spec)?,
            path,
        })
    }

    /// Returns managed kernels other than `except` that use `overlay`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernels directory cannot be read.
    pub fn sharing_overlay(
        &self,
        overlay: &Path,
        except: &KernelSlug,
    ) -> Result<Vec<InstalledKernel>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|k| k.slug != except.as_str())
            .filter(|k| k.record().is_some_and(|r| r.overlay == overlay))
            .collect())
    }

    /// Removes the kernel named `slug`.
    ///
    /// The directory is first renamed to a hidden name, so front ends stop
    /// seeing the kernel at once even if deleting its files takes a while
    /// or fails halfway. Kernels this tool did not write are refused unless
    /// `force` is set. Overlays are never touched.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] if the kernel does not exist,
    /// [`ProvisionError::Config`] if it is unmanaged and `force` is not set,
    /// and [`ProvisionError::Rename`] if it cannot be moved aside.
    pub fn remove(&self, slug: &KernelSlug, force: bool) -> Result<PathBuf> {
        let kernel = self.get(slug)?;
        if !kernel.is_managed() && !force {
            return Err(ProvisionError::Config {
                message: format!(
                    "kernel `{slug}` was not created by {}; use --force to remove it anyway",
                    jkrollout_common::constants::BIN_NAME
                ),
            });
        }

        let tombstone = tempfile::Builder::new()
            .prefix(&format!(".{slug}.removing-"))
            .tempdir_in(&self.root)
            .map_err(|e| self.io_err(e))?;
        std::fs::rename(&kernel.path, tombstone.path()).map_err(|e| ProvisionError::Rename {
            from: kernel.path.clone(),
            to: tombstone.path().to_path_buf(),
            source: e,
        })?;
        if let Err(e) = tombstone.close() {
            tracing::warn!(error = %e, "kernel hidden but its files could not be fully deleted");
        }
        tracing::info!(%slug, path = %kernel.path.display(), "kernel removed");
        Ok(kernel.path)
    }

    fn io_err(&self, source: std::io::Error) -> ProvisionError {
        ProvisionError::Io {
            path: self.root.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use jkrollout_common::config::ProvisionerConfig;
    use jkrollout_common::types::{ImageReference, KernelName, ResourceHint};

    use super::*;
    use crate::writer::{KernelSpecRequest, KernelSpecWriter};

    fn provision(config: &ProvisionerConfig, name: &str, overlay: &Path) -> PathBuf {
        let name = KernelName::new(name).unwrap();
        let image = ImageReference::new("/images/torch.sif");
        KernelSpecWriter::new(config, "apptainer")
            .write(&KernelSpecRequest {
                name: &name,
                image: &image,
                overlay,
                resource: ResourceHint::Cpu,
                force: false,
            })
            .unwrap()
    }

    fn setup() -> (tempfile::TempDir, ProvisionerConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = ProvisionerConfig {
            kernels_dir: dir.path().join("kernels"),
            ..ProvisionerConfig::default()
        };
        (dir, config)
    }

    fn foreign_kernel(root: &Path, slug: &str) {
        let dir = root.join(slug);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(KERNEL_JSON),
            r#"{"argv": ["python3", "-m", "ipykernel_launcher", "-f", "{connection_file}"],
                "display_name": "Python 3", "language": "python"}"#,
        )
        .unwrap();
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let (_dir, config) = setup();
        assert!(KernelCatalog::new(&config.kernels_dir).list().unwrap().is_empty());
    }

    #[test]
    fn list_is_sorted_and_skips_noise() {
        let (_dir, config) = setup();
        let overlay = Path::new("/overlays/torch");
        let _ = provision(&config, "Zeta", overlay);
        let _ = provision(&config, "Alpha", overlay);
        foreign_kernel(&config.kernels_dir, "python3");
        std::fs::create_dir_all(config.kernels_dir.join(".alpha.staging-x")).unwrap();
        std::fs::create_dir_all(config.kernels_dir.join("empty")).unwrap();
        let broken = config.kernels_dir.join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(KERNEL_JSON), "{not json").unwrap();

        let kernels = KernelCatalog::new(&config.kernels_dir).list().unwrap();
        let slugs: Vec<_> = kernels.iter().map(|k| k.slug.as_str()).collect();
        assert_eq!(slugs, ["alpha", "python3", "zeta"]);
        assert!(kernels[0].is_managed());
        assert!(!kernels[1].is_managed());
    }

    #[test]
    fn get_unknown_kernel_is_not_found() {
        let (_dir, config) = setup();
        let err = KernelCatalog::new(&config.kernels_dir)
            .get(&KernelSlug::parse("nope").unwrap())
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound { kind: "kernel", .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn sharing_overlay_excludes_self_and_other_overlays() {
        let (_dir, config) = setup();
        let shared = Path::new("/overlays/torch");
        let _ = provision(&config, "Torch A", shared);
        let _ = provision(&config, "Torch B", shared);
        let _ = provision(&config, "Other", Path::new("/overlays/other"));

        let catalog = KernelCatalog::new(&config.kernels_dir);
        let sharing = catalog
            .sharing_overlay(shared, &KernelSlug::parse("torch-a").unwrap())
            .unwrap();
        let slugs: Vec<_> = sharing.iter().map(|k| k.slug.as_str()).collect();
        assert_eq!(slugs, ["torch-b"]);
    }

    #[test]
    fn remove_deletes_managed_kernel() {
        let (_dir, config) = setup();
        let path = provision(&config, "PyTorch 2.9.1", Path::new("/overlays/torch"));
        let catalog = KernelCatalog::new(&config.kernels_dir);

        let removed = catalog
            .remove(&KernelSlug::parse("pytorch-2-9-1").unwrap(), false)
            .unwrap();
        assert_eq!(removed, path);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(&config.kernels_dir).unwrap().count(), 0);
    }

    #[test]
    fn remove_refuses_foreign_kernel_without_force() {
        let (_dir, config) = setup();
        foreign_kernel(&config.kernels_dir, "python3");
        let catalog = KernelCatalog::new(&config.kernels_dir);
        let slug = KernelSlug::parse("python3").unwrap();

        let err = catalog.remove(&slug, false).unwrap_err();
        assert!(matches!(err, ProvisionError::Config { .. }));
        assert!(config.kernels_dir.join("python3").is_dir());

        let _ = catalog.remove(&slug, true).unwrap();
        assert!(!config.kernels_dir.join("python3").exists());
    }
}
