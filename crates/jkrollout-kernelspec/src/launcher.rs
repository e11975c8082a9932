//! Launcher script generation.
//!
//! The launcher is the first element of the kernel's `argv`. It prepares
//! the host (environment modules, GPU checks) and then `exec`s the container
//! runtime, forwarding `"$@"` untouched so the connection file the front end
//! appends reaches the kernel in its original position.
//!
//! Output is a pure function of the inputs: the same spec always renders
//! byte-identical text.

use std::fmt::Write as _;
use std::path::Path;

use jkrollout_common::error::{ProvisionError, Result};
use jkrollout_common::types::{ImageReference, KernelName};

/// Environment variable that points user-level packages at the overlay.
const USER_BASE_ENV: &str = "PYTHONUSERBASE";

/// Shell scripts that define the `module` function on common HPC systems.
const MODULE_INIT_SCRIPTS: &[&str] = &["/etc/profile.d/lmod.sh", "/etc/profile.d/modules.sh"];

/// Everything a launcher needs to start a kernel.
#[derive(Debug, Clone)]
pub struct LauncherSpec<'a> {
    /// Kernel being launched.
    pub name: &'a KernelName,
    /// Container runtime program.
    pub runtime: &'a str,
    /// Image backing the kernel.
    pub image: &'a ImageReference,
    /// Overlay directory on the host.
    pub overlay: &'a Path,
    /// Container path the overlay is bound to.
    pub site_dir: &'a str,
    /// Whether to request GPU passthrough and run GPU prep.
    pub use_gpu: bool,
    /// Host modules to load.
    pub modules: &'a [String],
    /// Shell lines run before launch when `use_gpu` is set.
    pub gpu_prep: &'a [String],
    /// Interpreter inside the image.
    pub python: &'a str,
    /// Module that starts the kernel.
    pub launcher_module: &'a str,
}

fn quote(word: &str) -> Result<String> {
    shlex::try_quote(word)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| ProvisionError::Config {
            message: format!("cannot quote `{}` for the launcher: {e}", word.escape_debug()),
        })
}

/// Shell-quoted values interpolated into the script.
struct Quoted {
    runtime: String,
    bind: String,
    env: String,
    image: String,
    python: String,
    launcher_module: String,
    modules: Vec<String>,
}

impl LauncherSpec<'_> {
    /// Renders the launcher script.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] if a value cannot be shell-quoted
    /// (for example, it contains a NUL byte).
    pub fn render(&self) -> Result<String> {
        let quoted = Quoted {
            runtime: quote(self.runtime)?,
            bind: quote(&format!("{}:{}", self.overlay.display(), self.site_dir))?,
            env: quote(&format!("{USER_BASE_ENV}={}", self.site_dir))?,
            image: quote(&self.image.path().to_string_lossy())?,
            python: quote(self.python)?,
            launcher_module: quote(self.launcher_module)?,
            modules: self
                .modules
                .iter()
                .map(|m| quote(m))
                .collect::<Result<_>>()?,
        };
        self.write_script(&quoted).map_err(|e| ProvisionError::Config {
            message: format!("failed to format launcher script: {e}"),
        })
    }

    fn write_script(&self, q: &Quoted) -> std::result::Result<String, std::fmt::Error> {
        let mut s = String::new();
        writeln!(s, "#!/usr/bin/env bash")?;
        writeln!(
            s,
            "# Kernel launcher for {:?} ({}), generated by {}.",
            self.name.display(),
            self.name.slug(),
            jkrollout_common::constants::BIN_NAME
        )?;
        writeln!(s, "# Re-provision with --force to regenerate; manual edits are lost.")?;

        if !q.modules.is_empty() {
            writeln!(s)?;
            writeln!(s, "if ! type module >/dev/null 2>&1; then")?;
            writeln!(s, "    for init in {}; do", MODULE_INIT_SCRIPTS.join(" "))?;
            writeln!(s, "        if [ -f \"$init\" ]; then . \"$init\"; break; fi")?;
            writeln!(s, "    done")?;
            writeln!(s, "fi")?;
            writeln!(s, "if type module >/dev/null 2>&1; then")?;
            for module in &q.modules {
                writeln!(s, "    module load {module}")?;
            }
            writeln!(s, "fi")?;
        }

        if self.use_gpu && !self.gpu_prep.is_empty() {
            writeln!(s)?;
            for line in self.gpu_prep {
                writeln!(s, "{line}")?;
            }
        }

        writeln!(s)?;
        writeln!(s, "exec {} exec \\", q.runtime)?;
        if self.use_gpu {
            writeln!(s, "    --nv \\")?;
        }
        writeln!(s, "    --bind {} \\", q.bind)?;
        writeln!(s, "    --env {} \\", q.env)?;
        writeln!(s, "    {} \\", q.image)?;
        writeln!(s, "    {} -m {} \"$@\"", q.python, q.launcher_module)?;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        name: KernelName,
        image: ImageReference,
        modules: Vec<String>,
        gpu_prep: Vec<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                name: KernelName::new("PyTorch 2.9.1").unwrap(),
                image: ImageReference::new("/home/u/pytorch-2.9.1.sif"),
                modules: vec!["apptainer".into()],
                gpu_prep: vec!["nvidia-smi -L".into()],
            }
        }

        fn spec(&self, use_gpu: bool) -> LauncherSpec<'_> {
            LauncherSpec {
                name: &self.name,
                runtime: "apptainer",
                image: &self.image,
                overlay: Path::new("/home/u/.jkrollout/overlays/pytorch-2.9.1"),
                site_dir: "/opt/jkrollout/site",
                use_gpu,
                modules: &self.modules,
                gpu_prep: &self.gpu_prep,
                python: "python3",
                launcher_module: "ipykernel_launcher",
            }
        }
    }

    /// Shell words of the first line containing `needle`, minus a trailing
    /// line continuation.
    fn words(script: &str, needle: &str) -> Vec<String> {
        let line = script.lines().find(|l| l.contains(needle)).unwrap();
        shlex::split(line.trim_end_matches('\\')).unwrap()
    }

    #[test]
    fn gpu_launcher_requests_passthrough_and_binds_overlay() {
        let f = Fixture::new();
        let script = f.spec(true).render().unwrap();
        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("    --nv \\\n"));
        assert_eq!(
            words(&script, "--bind"),
            ["--bind", "/home/u/.jkrollout/overlays/pytorch-2.9.1:/opt/jkrollout/site"]
        );
        assert_eq!(
            words(&script, "--env"),
            ["--env", "PYTHONUSERBASE=/opt/jkrollout/site"]
        );
        assert!(script.contains("nvidia-smi -L\n"));
        assert!(script.contains("    module load apptainer\n"));
    }

    #[test]
    fn cpu_launcher_has_no_gpu_steps() {
        let f = Fixture::new();
        let script = f.spec(false).render().unwrap();
        assert!(!script.contains("--nv"));
        assert!(!script.contains("nvidia-smi"));
    }

    #[test]
    fn arguments_are_forwarded_last_and_unchanged() {
        let f = Fixture::new();
        let script = f.spec(true).render().unwrap();
        let last = script.lines().last().unwrap();
        assert!(last.ends_with(" \"$@\""));
        assert_eq!(
            shlex::split(last).unwrap(),
            ["python3", "-m", "ipykernel_launcher", "$@"]
        );
        assert!(script.contains("\nexec apptainer exec \\\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let f = Fixture::new();
        assert_eq!(f.spec(true).render().unwrap(), f.spec(true).render().unwrap());
    }

    #[test]
    fn paths_with_spaces_are_quoted() {
        let f = Fixture {
            image: ImageReference::new("/home/u/my images/torch.sif"),
            ..Fixture::new()
        };
        let script = f.spec(false).render().unwrap();
        assert_eq!(words(&script, "torch.sif"), ["/home/u/my images/torch.sif"]);
    }

    #[test]
    fn display_name_cannot_break_out_of_comment() {
        let f = Fixture {
            name: KernelName::new("Evil\nrm -rf ~").unwrap(),
            ..Fixture::new()
        };
        let script = f.spec(false).render().unwrap();
        assert!(!script.lines().any(|l| l.starts_with("rm -rf")));
    }

    #[test]
    fn no_module_section_without_modules() {
        let f = Fixture {
            modules: Vec::new(),
            ..Fixture::new()
        };
        let script = f.spec(false).render().unwrap();
        assert!(!script.contains("module"));
    }

    #[cfg(unix)]
    #[test]
    fn launcher_forwards_arguments_to_runtime() {
        use std::os::unix::fs::PermissionsExt;

        if which_bash().is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let fake_runtime = dir.path().join("fake-apptainer");
        let args_file = dir.path().join("args");
        std::fs::write(
            &fake_runtime,
            format!(
                "#!/bin/sh\nfor a in \"$@\"; do printf '%s\\n' \"$a\"; done > '{}'\n",
                args_file.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&fake_runtime, std::fs::Permissions::from_mode(0o755)).unwrap();

        let f = Fixture {
            modules: Vec::new(),
            gpu_prep: Vec::new(),
            ..Fixture::new()
        };
        let runtime = fake_runtime.to_string_lossy().into_owned();
        let spec = LauncherSpec {
            runtime: &runtime,
            ..f.spec(true)
        };
        let launcher = dir.path().join("launcher.sh");
        std::fs::write(&launcher, spec.render().unwrap()).unwrap();
        std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();

        let status = std::process::Command::new(&launcher)
            .args(["-f", "/run/user/1000/kernel-abc 1.json"])
            .status()
            .unwrap();
        assert!(status.success());

        let args = std::fs::read_to_string(&args_file).unwrap();
        let args: Vec<_> = args.lines().collect();
        assert_eq!(args[0], "exec");
        assert_eq!(args[1], "--nv");
        assert_eq!(
            &args[args.len() - 5..],
            [
                "python3",
                "-m",
                "ipykernel_launcher",
                "-f",
                "/run/user/1000/kernel-abc 1.json"
            ]
        );
    }

    #[cfg(unix)]
    fn which_bash() -> Option<()> {
        std::process::Command::new("bash")
            .arg("-c")
            .arg("true")
            .status()
            .ok()
            .filter(std::process::ExitStatus::success)
            .map(|_| ())
    }
}
