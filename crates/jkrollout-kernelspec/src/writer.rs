//! Staged, atomically published kernel spec directories.
//!
//! A kernel is assembled in a hidden staging directory next to its final
//! location and moved into place with a single rename. Readers of the
//! kernels directory therefore see either the previous complete kernel or
//! the new complete one, and never a directory under its final name that is
//! missing files.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use jkrollout_common::config::ProvisionerConfig;
use jkrollout_common::constants::{KERNEL_JSON, LAUNCHER_NAME};
use jkrollout_common::error::{ProvisionError, Result};
use jkrollout_common::types::{ImageReference, KernelName, KernelSlug, ResourceHint};
use tempfile::TempDir;

use crate::descriptor::{KernelDescriptor, ProvisionRecord};
use crate::launcher::LauncherSpec;
use crate::publish;

/// Inputs for one kernel spec.
#[derive(Debug, Clone)]
pub struct KernelSpecRequest<'a> {
    /// Display name and slug.
    pub name: &'a KernelName,
    /// Image backing the kernel.
    pub image: &'a ImageReference,
    /// Host overlay directory holding the shim.
    pub overlay: &'a Path,
    /// Resource class.
    pub resource: ResourceHint,
    /// Replace an existing kernel with the same slug.
    pub force: bool,
}

/// Writes kernel spec directories under the configured kernels directory.
#[derive(Debug, Clone, Copy)]
pub struct KernelSpecWriter<'a> {
    config: &'a ProvisionerConfig,
    runtime_program: &'a str,
}

impl<'a> KernelSpecWriter<'a> {
    /// Creates a writer whose launchers invoke `runtime_program`.
    #[must_use]
    pub const fn new(config: &'a ProvisionerConfig, runtime_program: &'a str) -> Self {
        Self {
            config,
            runtime_program,
        }
    }

    /// Returns the final directory for `slug`.
    #[must_use]
    pub fn target_dir(&self, slug: &KernelSlug) -> PathBuf {
        self.config.kernels_dir.join(slug.as_str())
    }

    /// Fails with [`ProvisionError::KernelConflict`] if `slug` is taken and
    /// `force` is not set.
    ///
    /// This is only an early exit. [`StagedKernel::publish`] checks again.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::KernelConflict`] on a conflict.
    pub fn check_available(&self, slug: &KernelSlug, force: bool) -> Result<()> {
        let target = self.target_dir(slug);
        if !force && target.symlink_metadata().is_ok() {
            return Err(conflict(slug, target));
        }
        Ok(())
    }

    /// Writes the launcher and descriptor into a staging directory.
    ///
    /// Nothing is visible under the final name until
    /// [`StagedKernel::publish`] is called. Dropping the returned value
    /// removes the staging directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::KernelConflict`] if the slug is taken and
    /// `force` is not set, and [`ProvisionError::StagingWrite`] if the
    /// staging directory or its files cannot be written.
    pub fn stage(&self, request: &KernelSpecRequest<'_>) -> Result<StagedKernel> {
        let slug = request.name.slug().clone();
        self.check_available(&slug, request.force)?;

        let kernels_dir = &self.config.kernels_dir;
        std::fs::create_dir_all(kernels_dir).map_err(|e| staging_err(kernels_dir, e))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{slug}.staging-"))
            .tempdir_in(kernels_dir)
            .map_err(|e| staging_err(kernels_dir, e))?;
        set_mode(staging.path(), 0o755).map_err(|e| staging_err(staging.path(), e))?;

        let target = self.target_dir(&slug);
        let launcher = LauncherSpec {
            name: request.name,
            runtime: self.runtime_program,
            image: request.image,
            overlay: request.overlay,
            site_dir: &self.config.container_site_dir,
            use_gpu: request.resource.uses_gpu(),
            modules: &self.config.modules,
            gpu_prep: &self.config.gpu_prep,
            python: &self.config.shim.python,
            launcher_module: &self.config.shim.launcher_module,
        }
        .render()?;
        let launcher_path = staging.path().join(LAUNCHER_NAME);
        write_synced(&launcher_path, launcher.as_bytes())?;
        set_mode(&launcher_path, 0o755).map_err(|e| staging_err(&launcher_path, e))?;

        let record = ProvisionRecord {
            slug: slug.to_string(),
            image: request.image.path().to_path_buf(),
            overlay: request.overlay.to_path_buf(),
            resource: request.resource,
            provisioned_at: chrono::Utc::now()
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
        };
        let descriptor = KernelDescriptor::new(
            &target.join(LAUNCHER_NAME),
            request.name.display(),
            &self.config.language,
            record,
        );
        write_synced(&staging.path().join(KERNEL_JSON), descriptor.to_json()?.as_bytes())?;

        tracing::debug!(%slug, staging = %staging.path().display(), "kernel staged");
        Ok(StagedKernel {
            staging,
            target,
            slug,
            force: request.force,
        })
    }

    /// Stages and publishes a kernel, returning its final directory.
    ///
    /// # Errors
    ///
    /// See [`KernelSpecWriter::stage`] and [`StagedKernel::publish`].
    pub fn write(&self, request: &KernelSpecRequest<'_>) -> Result<PathBuf> {
        self.stage(request)?.publish()
    }
}

/// A fully written kernel directory waiting to be published.
#[derive(Debug)]
pub struct StagedKernel {
    staging: TempDir,
    target: PathBuf,
    slug: KernelSlug,
    force: bool,
}

impl StagedKernel {
    /// Directory currently holding the staged files.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }

    /// Moves the staged kernel to its final name.
    ///
    /// Existence of the target is checked again here, so a kernel created
    /// by a concurrent run after [`KernelSpecWriter::stage`] is reported as
    /// a conflict rather than overwritten. With `force` an existing kernel
    /// is swapped out in one step where the filesystem supports it.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::KernelConflict`] if the target appeared and
    /// `force` is not set, and [`ProvisionError::Rename`] if the rename
    /// fails.
    pub fn publish(self) -> Result<PathBuf> {
        let exists = self.target.symlink_metadata().is_ok();
        if exists && !self.force {
            return Err(conflict(&self.slug, self.target));
        }
        if exists {
            return self.replace();
        }
        match publish::rename_noreplace(self.staging.path(), &self.target) {
            Ok(()) => {
                tracing::info!(slug = %self.slug, path = %self.target.display(), "kernel published");
                Ok(self.target)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if self.force {
                    self.replace()
                } else {
                    Err(conflict(&self.slug, self.target))
                }
            }
            Err(e) => Err(self.rename_err(e)),
        }
    }

    fn replace(self) -> Result<PathBuf> {
        match publish::exchange(self.staging.path(), &self.target) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Unsupported => self.replace_in_two_steps()?,
            Err(e) => return Err(self.rename_err(e)),
        }
        tracing::info!(slug = %self.slug, path = %self.target.display(), "kernel replaced");
        // The staging path now holds the previous kernel.
        if let Err(e) = self.staging.close() {
            tracing::warn!(error = %e, "failed to remove replaced kernel directory");
        }
        Ok(self.target)
    }

    /// Moves the old kernel aside, then moves the new one in. The kernel is
    /// briefly absent but never partially written.
    fn replace_in_two_steps(&self) -> Result<()> {
        tracing::warn!(
            path = %self.target.display(),
            "atomic exchange unsupported, replacing kernel in two renames"
        );
        let parent = self.target.parent().unwrap_or_else(|| Path::new("."));
        let tombstone = tempfile::Builder::new()
            .prefix(&format!(".{}.replaced-", self.slug))
            .tempdir_in(parent)
            .map_err(|e| self.rename_err(e))?;
        let old = tombstone.path().join(self.slug.as_str());
        std::fs::rename(&self.target, &old).map_err(|e| self.rename_err(e))?;
        if let Err(e) = publish::rename_noreplace(self.staging.path(), &self.target) {
            if let Err(restore) = std::fs::rename(&old, &self.target) {
                let kept = tombstone.keep();
                tracing::error!(
                    error = %restore,
                    kept = %kept.display(),
                    "failed to restore previous kernel"
                );
            }
            return Err(self.rename_err(e));
        }
        // Park the old kernel at the staging path so closing it removes it.
        // The new kernel is live either way; the tombstone drop cleans up.
        if let Err(e) = std::fs::rename(&old, self.staging.path()) {
            tracing::warn!(error = %e, old = %old.display(), "could not park replaced kernel");
        }
        Ok(())
    }

    fn rename_err(&self, source: std::io::Error) -> ProvisionError {
        ProvisionError::Rename {
            from: self.staging.path().to_path_buf(),
            to: self.target.clone(),
            source,
        }
    }
}

fn conflict(slug: &KernelSlug, path: PathBuf) -> ProvisionError {
    ProvisionError::KernelConflict {
        slug: slug.to_string(),
        path,
    }
}

fn staging_err(path: &Path, source: std::io::Error) -> ProvisionError {
    ProvisionError::StagingWrite {
        path: path.to_path_buf(),
        source,
    }
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = std::fs::File::create(path).map_err(|e| staging_err(path, e))?;
    file.write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|e| staging_err(path, e))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Env {
        _dir: tempfile::TempDir,
        config: ProvisionerConfig,
        image: ImageReference,
        overlay: PathBuf,
    }

    fn env() -> Env {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("pytorch-2.9.1.sif");
        std::fs::write(&image, b"sif").unwrap();
        let config = ProvisionerConfig {
            kernels_dir: dir.path().join("kernels"),
            overlay_root: dir.path().join("overlays"),
            ..ProvisionerConfig::default()
        };
        let overlay = config.overlay_root.join("pytorch-2.9.1");
        Env {
            _dir: dir,
            image: ImageReference::new(image),
            overlay,
            config,
        }
    }

    fn request<'a>(
        env: &'a Env,
        name: &'a KernelName,
        resource: ResourceHint,
        force: bool,
    ) -> KernelSpecRequest<'a> {
        KernelSpecRequest {
            name,
            image: &env.image,
            overlay: &env.overlay,
            resource,
            force,
        }
    }

    fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.file_name().to_string_lossy().into_owned(),
                    std::fs::read(e.path()).unwrap(),
                )
            })
            .collect();
        files.sort();
        files
    }

    fn hidden_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect()
    }

    #[test]
    fn write_publishes_complete_directory() {
        let env = env();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();
        let writer = KernelSpecWriter::new(&env.config, "apptainer");

        let path = writer
            .write(&request(&env, &name, ResourceHint::Gpu, false))
            .unwrap();

        assert_eq!(path, env.config.kernels_dir.join("pytorch-2-9-1"));
        let descriptor = KernelDescriptor::read(&path.join(KERNEL_JSON)).unwrap();
        assert_eq!(descriptor.display_name, "PyTorch 2.9.1");
        assert_eq!(descriptor.language, "python");
        assert_eq!(
            descriptor.argv[0],
            path.join(LAUNCHER_NAME).to_string_lossy()
        );
        let record = descriptor.record().unwrap();
        assert_eq!(record.resource, ResourceHint::Gpu);
        assert_eq!(record.overlay, env.overlay);
        let launcher = std::fs::read_to_string(path.join(LAUNCHER_NAME)).unwrap();
        assert!(launcher.contains("--nv"));
        assert!(hidden_entries(&env.config.kernels_dir).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn launcher_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let env = env();
        let name = KernelName::new("CPU kernel").unwrap();
        let path = KernelSpecWriter::new(&env.config, "apptainer")
            .write(&request(&env, &name, ResourceHint::Cpu, false))
            .unwrap();
        let mode = std::fs::metadata(path.join(LAUNCHER_NAME))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn second_write_without_force_conflicts_and_preserves_files() {
        let env = env();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();
        let writer = KernelSpecWriter::new(&env.config, "apptainer");
        let path = writer
            .write(&request(&env, &name, ResourceHint::Gpu, false))
            .unwrap();
        let before = snapshot(&path);

        let err = writer
            .write(&request(&env, &name, ResourceHint::Cpu, false))
            .unwrap_err();

        assert!(matches!(err, ProvisionError::KernelConflict { ref slug, .. } if slug == "pytorch-2-9-1"));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(snapshot(&path), before);
        assert!(hidden_entries(&env.config.kernels_dir).is_empty());
    }

    #[test]
    fn force_replaces_launcher() {
        let env = env();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();
        let writer = KernelSpecWriter::new(&env.config, "apptainer");
        let path = writer
            .write(&request(&env, &name, ResourceHint::Gpu, false))
            .unwrap();
        std::fs::write(path.join("stale"), "from the old kernel").unwrap();

        let again = writer
            .write(&request(&env, &name, ResourceHint::Cpu, true))
            .unwrap();

        assert_eq!(again, path);
        let launcher = std::fs::read_to_string(path.join(LAUNCHER_NAME)).unwrap();
        assert!(!launcher.contains("--nv"));
        assert!(!path.join("stale").exists());
        let record = KernelDescriptor::read(&path.join(KERNEL_JSON))
            .unwrap()
            .record()
            .cloned()
            .unwrap();
        assert_eq!(record.image, env.image.path());
        assert_eq!(record.overlay, env.overlay);
        assert!(hidden_entries(&env.config.kernels_dir).is_empty());
    }

    #[test]
    fn two_step_replace_publishes_new_kernel_and_parks_old() {
        let env = env();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();
        let writer = KernelSpecWriter::new(&env.config, "apptainer");
        let path = writer
            .write(&request(&env, &name, ResourceHint::Gpu, false))
            .unwrap();
        std::fs::write(path.join("stale"), "from the old kernel").unwrap();

        let staged = writer
            .stage(&request(&env, &name, ResourceHint::Cpu, true))
            .unwrap();
        staged.replace_in_two_steps().unwrap();

        let launcher = std::fs::read_to_string(path.join(LAUNCHER_NAME)).unwrap();
        assert!(!launcher.contains("--nv"));
        assert!(!path.join("stale").exists());
        assert!(staged.staging_path().join("stale").is_file());
        drop(staged);
        assert!(hidden_entries(&env.config.kernels_dir).is_empty());
    }

    #[test]
    fn two_step_replace_restores_previous_kernel_when_move_in_fails() {
        let env = env();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();
        let writer = KernelSpecWriter::new(&env.config, "apptainer");
        let path = writer
            .write(&request(&env, &name, ResourceHint::Gpu, false))
            .unwrap();
        let before = snapshot(&path);

        let staged = writer
            .stage(&request(&env, &name, ResourceHint::Cpu, true))
            .unwrap();
        // Nothing left to move in, so the second rename fails.
        std::fs::remove_dir_all(staged.staging_path()).unwrap();

        let err = staged.replace_in_two_steps().unwrap_err();
        assert!(matches!(err, ProvisionError::Rename { .. }));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(snapshot(&path), before);
        drop(staged);
        assert!(hidden_entries(&env.config.kernels_dir).is_empty());
    }

    #[test]
    fn crash_before_publish_leaves_no_final_directory() {
        let env = env();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();
        let writer = KernelSpecWriter::new(&env.config, "apptainer");

        let staged = writer
            .stage(&request(&env, &name, ResourceHint::Gpu, false))
            .unwrap();
        let staging = staged.staging_path().to_path_buf();
        assert!(staging.join(KERNEL_JSON).is_file());
        // A crash skips both publication and cleanup.
        std::mem::forget(staged);

        assert!(!writer.target_dir(name.slug()).exists());
        assert!(staging.starts_with(&env.config.kernels_dir));
        assert!(
            staging
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(".pytorch-2-9-1.staging-")
        );
    }

    #[test]
    fn dropped_stage_is_cleaned_up() {
        let env = env();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();
        let writer = KernelSpecWriter::new(&env.config, "apptainer");
        drop(
            writer
                .stage(&request(&env, &name, ResourceHint::Gpu, false))
                .unwrap(),
        );
        assert!(hidden_entries(&env.config.kernels_dir).is_empty());
        assert!(!writer.target_dir(name.slug()).exists());
    }

    #[test]
    fn publish_rechecks_for_concurrent_writer() {
        let env = env();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();
        let writer = KernelSpecWriter::new(&env.config, "apptainer");

        let staged = writer
            .stage(&request(&env, &name, ResourceHint::Gpu, false))
            .unwrap();
        // Another run publishes the same slug in between.
        let winner = writer
            .write(&request(&env, &name, ResourceHint::Cpu, false))
            .unwrap();
        let before = snapshot(&winner);

        let err = staged.publish().unwrap_err();
        assert!(matches!(err, ProvisionError::KernelConflict { .. }));
        assert_eq!(snapshot(&winner), before);
        assert!(hidden_entries(&env.config.kernels_dir).is_empty());
    }

    #[test]
    fn unwritable_kernels_dir_is_a_staging_error() {
        let env = env();
        std::fs::write(&env.config.kernels_dir, b"not a directory").unwrap();
        let name = KernelName::new("PyTorch 2.9.1").unwrap();

        let err = KernelSpecWriter::new(&env.config, "apptainer")
            .write(&request(&env, &name, ResourceHint::Gpu, false))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::StagingWrite { .. }));
        assert_eq!(err.exit_code(), 4);
    }
}
