//! End-to-end provisioning against the scripted runtime.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};

use jkrollout_common::config::ProvisionerConfig;
use jkrollout_common::constants::{KERNEL_JSON, LAUNCHER_NAME};
use jkrollout_common::error::ProvisionError;
use jkrollout_common::types::ResourceHint;
use jkrollout_kernelspec::descriptor::KernelDescriptor;
use jkrollout_runtime::fake::{CallKind, FakeRuntime, InstallBehavior, ProbeBehavior, SHIM_MARKER};
use jkrollout_runtime::overlay::InstallOutcome;
use jkrollout_sdk::builder::{ProvisionRequest, ProvisionRequestBuilder};
use jkrollout_sdk::provisioner::Provisioner;

struct Site {
    _dir: tempfile::TempDir,
    config: ProvisionerConfig,
    image: PathBuf,
}

impl Site {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("images").join("pytorch-2.9.1.sif");
        std::fs::create_dir_all(image.parent().unwrap()).unwrap();
        std::fs::write(&image, b"SIF").unwrap();
        let config = ProvisionerConfig {
            kernels_dir: dir.path().join("kernels"),
            overlay_root: dir.path().join("overlays"),
            ..ProvisionerConfig::default()
        };
        Self {
            _dir: dir,
            config,
            image,
        }
    }

    fn request(&self, name: &str, resource: ResourceHint, force: bool) -> ProvisionRequest {
        ProvisionRequestBuilder::new(&self.image, name)
            .resource(resource)
            .force(force)
            .build()
            .unwrap()
    }

    fn overlay(&self) -> PathBuf {
        self.config.overlay_root.join("pytorch-2.9.1")
    }

    fn kernel_dir(&self, slug: &str) -> PathBuf {
        self.config.kernels_dir.join(slug)
    }

    fn kernels_dir_entries(&self) -> Vec<String> {
        match std::fs::read_dir(&self.config.kernels_dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Top-level files of `dir` with their contents.
fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.path().is_file())
        .map(|e| {
            (
                e.file_name().to_string_lossy().into_owned(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

fn launcher_words(kernel: &Path) -> Vec<String> {
    let script = std::fs::read_to_string(kernel.join(LAUNCHER_NAME)).unwrap();
    let exec = &script[script.find("exec ").unwrap()..];
    shlex::split(&exec.replace("\\\n", " ")).unwrap()
}

#[test]
fn gpu_kernel_installs_shim_and_publishes() {
    let site = Site::new();
    let runtime = FakeRuntime::new();

    let report = Provisioner::new(&runtime, &site.config)
        .provision(&site.request("PyTorch 2.9.1", ResourceHint::Gpu, false))
        .unwrap();

    assert_eq!(report.slug.as_str(), "pytorch-2-9-1");
    assert_eq!(report.path, site.kernel_dir("pytorch-2-9-1"));
    assert_eq!(report.overlay, site.overlay());
    assert!(matches!(report.outcome, InstallOutcome::Installed { .. }));
    assert!(report.shared_with.is_empty());
    assert_eq!(runtime.count(CallKind::Install), 1);
    assert_eq!(runtime.count(CallKind::Probe), 2);
    assert!(site.overlay().join(SHIM_MARKER).exists());

    let words = launcher_words(&report.path);
    assert_eq!(&words[..3], ["exec", "apptainer", "exec"]);
    assert!(words.contains(&"--nv".to_owned()));
    let bind = format!("{}:/opt/jkrollout/site", site.overlay().display());
    let at = words.iter().position(|w| w == "--bind").unwrap();
    assert_eq!(words[at + 1], bind);
    assert!(words.contains(&site.image.to_string_lossy().into_owned()));
    assert_eq!(words.last().unwrap(), "$@");

    let descriptor = KernelDescriptor::read(&report.path.join(KERNEL_JSON)).unwrap();
    assert_eq!(descriptor.display_name, "PyTorch 2.9.1");
    assert_eq!(
        descriptor.argv,
        [
            report.path.join(LAUNCHER_NAME).to_string_lossy().into_owned(),
            "-f".to_owned(),
            "{connection_file}".to_owned(),
        ]
    );
}

#[test]
fn second_kernel_on_same_image_reuses_overlay_without_installing() {
    let site = Site::new();
    let runtime = FakeRuntime::new();
    let provisioner = Provisioner::new(&runtime, &site.config);

    let _ = provisioner
        .provision(&site.request("Torch GPU", ResourceHint::Gpu, false))
        .unwrap();
    let report = provisioner
        .provision(&site.request("Torch CPU", ResourceHint::Cpu, false))
        .unwrap();

    assert_eq!(runtime.count(CallKind::Install), 1);
    assert!(matches!(report.outcome, InstallOutcome::AlreadyPresent { .. }));
    assert_eq!(report.shared_with, ["torch-gpu"]);
}

#[test]
fn conflict_without_force_leaves_kernel_untouched() {
    let site = Site::new();
    let runtime = FakeRuntime::new();
    let provisioner = Provisioner::new(&runtime, &site.config);
    let first = provisioner
        .provision(&site.request("PyTorch 2.9.1", ResourceHint::Gpu, false))
        .unwrap();
    let before = snapshot(&first.path);
    let calls_before = runtime.calls().len();

    let err = provisioner
        .provision(&site.request("PyTorch 2.9.1", ResourceHint::Cpu, false))
        .unwrap_err();

    assert!(matches!(err, ProvisionError::KernelConflict { .. }));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(snapshot(&first.path), before);
    assert_eq!(runtime.calls().len(), calls_before);
    assert_eq!(site.kernels_dir_entries(), ["pytorch-2-9-1"]);
}

#[test]
fn force_replaces_launcher_but_keeps_overlay_and_image() {
    let site = Site::new();
    let runtime = FakeRuntime::new();
    let provisioner = Provisioner::new(&runtime, &site.config);
    let first = provisioner
        .provision(&site.request("PyTorch 2.9.1", ResourceHint::Gpu, false))
        .unwrap();
    let gpu_launcher = std::fs::read(first.path.join(LAUNCHER_NAME)).unwrap();
    let overlay_before = snapshot(&site.overlay());

    let second = provisioner
        .provision(&site.request("PyTorch 2.9.1", ResourceHint::Cpu, true))
        .unwrap();

    assert_eq!(second.path, first.path);
    let cpu_launcher = std::fs::read(second.path.join(LAUNCHER_NAME)).unwrap();
    assert_ne!(cpu_launcher, gpu_launcher);
    assert!(!launcher_words(&second.path).contains(&"--nv".to_owned()));
    assert_eq!(snapshot(&site.overlay()), overlay_before);
    assert_eq!(runtime.count(CallKind::Install), 1);

    let record = KernelDescriptor::read(&second.path.join(KERNEL_JSON))
        .unwrap()
        .record()
        .cloned()
        .unwrap();
    assert_eq!(record.image, site.image);
    assert_eq!(record.overlay, site.overlay());
    assert_eq!(record.resource, ResourceHint::Cpu);
    assert_eq!(site.kernels_dir_entries(), ["pytorch-2-9-1"]);
}

#[test]
fn slug_is_stable_across_runs() {
    let site = Site::new();
    let runtime = FakeRuntime::with_shim_in_image();
    let provisioner = Provisioner::new(&runtime, &site.config);

    let slugs: Vec<_> = (0..3)
        .map(|_| {
            provisioner
                .provision(&site.request("PyTorch 2.9.1", ResourceHint::Gpu, true))
                .unwrap()
                .slug
        })
        .collect();

    assert!(slugs.iter().all(|s| s.as_str() == "pytorch-2-9-1"));
}

#[test]
fn shim_in_image_needs_one_probe_and_no_install() {
    let site = Site::new();
    let runtime = FakeRuntime::with_shim_in_image();

    let report = Provisioner::new(&runtime, &site.config)
        .provision(&site.request("PyTorch 2.9.1", ResourceHint::Cpu, false))
        .unwrap();

    assert_eq!(runtime.count(CallKind::Probe), 1);
    assert_eq!(runtime.count(CallKind::Install), 0);
    assert!(matches!(report.outcome, InstallOutcome::AlreadyPresent { .. }));
    assert!(report.path.join(KERNEL_JSON).is_file());
    // The launcher binds the overlay, so it must exist even with nothing in it.
    assert!(site.overlay().is_dir());
    let bind = format!("{}:/opt/jkrollout/site", site.overlay().display());
    assert!(launcher_words(&report.path).contains(&bind));
}

#[test]
fn detection_timeout_fails_without_kernel() {
    let site = Site::new();
    let runtime = FakeRuntime::new().probe(ProbeBehavior::TimeOut);

    let err = Provisioner::new(&runtime, &site.config)
        .provision(&site.request("PyTorch 2.9.1", ResourceHint::Gpu, false))
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Detection { .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(runtime.count(CallKind::Install), 0);
    assert!(site.kernels_dir_entries().is_empty());
}

#[test]
fn install_without_effect_is_a_verification_failure() {
    let site = Site::new();
    let runtime = FakeRuntime::new().install(InstallBehavior::NoEffect);

    let err = Provisioner::new(&runtime, &site.config)
        .provision(&site.request("PyTorch 2.9.1", ResourceHint::Gpu, false))
        .unwrap_err();

    assert!(matches!(err, ProvisionError::InstallVerification { .. }));
    assert_eq!(err.exit_code(), 3);
    assert!(site.kernels_dir_entries().is_empty());
}

#[test]
fn missing_image_fails_before_any_runtime_call() {
    let site = Site::new();
    let runtime = FakeRuntime::new();
    let request = ProvisionRequestBuilder::new(site.image.with_file_name("missing.sif"), "X")
        .build()
        .unwrap();

    let err = Provisioner::new(&runtime, &site.config)
        .provision(&request)
        .unwrap_err();

    assert!(matches!(err, ProvisionError::ImageNotFound { .. }));
    assert_eq!(err.exit_code(), 4);
    assert!(runtime.calls().is_empty());
}

#[test]
fn overlay_override_is_used_for_install_and_launcher() {
    let site = Site::new();
    let runtime = FakeRuntime::new();
    let custom = site.config.overlay_root.join("custom");
    let request = ProvisionRequestBuilder::new(&site.image, "Custom")
        .overlay_dir(&custom)
        .build()
        .unwrap();

    let report = Provisioner::new(&runtime, &site.config)
        .provision(&request)
        .unwrap();

    assert_eq!(report.overlay, custom);
    assert!(custom.join(SHIM_MARKER).exists());
    assert!(!site.overlay().exists());
    let bind = format!("{}:/opt/jkrollout/site", custom.display());
    assert!(launcher_words(&report.path).contains(&bind));
}
