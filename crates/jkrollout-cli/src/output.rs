//! Formatted output for CLI commands.
//!
//! Every command produces a [`Report`] with a text and a JSON rendering.
//! Results go to stdout. Errors go to stderr as text, or to stdout as a
//! JSON object when `--json` is set so callers read a single stream.

use std::path::Path;

use jkrollout_common::error::{EXIT_USAGE, ProvisionError};
use jkrollout_kernelspec::catalog::InstalledKernel;
use jkrollout_runtime::overlay::InstallOutcome;
use jkrollout_sdk::provisioner::ProvisionReport;
use serde_json::{Value, json};

/// A command result in both renderings.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Text for humans, without a trailing newline.
    pub text: String,
    /// Machine-readable object.
    pub json: Value,
}

/// Prints `report` to stdout.
#[allow(clippy::print_stdout)]
pub fn emit(report: &Report, json: bool) {
    if json {
        println!("{}", report.json);
    } else if !report.text.is_empty() {
        println!("{}", report.text);
    }
}

/// Prints `err` and returns the exit code for it.
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn error(err: &anyhow::Error, json: bool) -> u8 {
    let (code, report) = failure(err);
    if json {
        println!("{}", report.json);
    } else {
        eprintln!("{}", report.text);
    }
    code
}

/// Renders a failed command.
pub fn failure(err: &anyhow::Error) -> (u8, Report) {
    let Some(provision) = err.downcast_ref::<ProvisionError>() else {
        let message = format!("{err:#}");
        return (
            EXIT_USAGE,
            Report {
                text: format!("error: {message}"),
                json: json!({
                    "status": "error",
                    "category": "usage",
                    "kind": "Error",
                    "message": message,
                    "diagnostics": Value::Null,
                    "exit_code": EXIT_USAGE,
                }),
            },
        );
    };

    let code = provision.exit_code();
    // Variant messages already embed their source.
    let message = provision.to_string();
    let diagnostics = provision.diagnostics();
    let mut text = format!("error[{}]: {message}", provision.kind());
    if let Some(diag) = diagnostics {
        text.push_str("\n--- captured output ---\n");
        text.push_str(diag);
    }
    (
        code,
        Report {
            text,
            json: json!({
                "status": "error",
                "category": provision.category().to_string(),
                "kind": provision.kind(),
                "message": message,
                "diagnostics": diagnostics,
                "exit_code": code,
            }),
        },
    )
}

/// Renders a provisioned kernel. The text form is just the kernel path.
pub fn provisioned(report: &ProvisionReport) -> Report {
    let outcome = match &report.outcome {
        InstallOutcome::AlreadyPresent { .. } => "already-present",
        InstallOutcome::Installed { .. } => "installed",
    };
    Report {
        text: report.path.display().to_string(),
        json: json!({
            "status": "ok",
            "slug": report.slug.as_str(),
            "path": report.path,
            "overlay": report.overlay,
            "shim": {
                "outcome": outcome,
                "version": report.outcome.version(),
            },
            "shared_with": report.shared_with,
        }),
    }
}

/// Renders the kernel list.
pub fn kernel_table(root: &Path, kernels: &[InstalledKernel]) -> Report {
    let rows: Vec<Value> = kernels
        .iter()
        .map(|k| {
            let record = k.record();
            json!({
                "slug": k.slug,
                "display_name": k.descriptor.display_name,
                "path": k.path,
                "managed": k.is_managed(),
                "resource": record.map(|r| r.resource),
                "image": record.map(|r| &r.image),
                "overlay": record.map(|r| &r.overlay),
            })
        })
        .collect();

    let text = if kernels.is_empty() {
        format!("No kernels found in {}.", root.display())
    } else {
        let mut text = format!(
            "{:<28} {:<8} {:<9} {:<28} {}",
            "SLUG", "MANAGED", "RESOURCE", "DISPLAY NAME", "IMAGE"
        );
        for k in kernels {
            let record = k.record();
            text.push('\n');
            text.push_str(&format!(
                "{:<28} {:<8} {:<9} {:<28} {}",
                k.slug,
                if k.is_managed() { "yes" } else { "no" },
                record.map_or_else(|| "-".to_owned(), |r| r.resource.to_string()),
                k.descriptor.display_name,
                record.map_or_else(|| "-".to_owned(), |r| r.image.display().to_string()),
            ));
        }
        text
    };

    Report {
        text,
        json: json!({ "status": "ok", "kernels": rows }),
    }
}

/// Renders a removed kernel.
pub fn removed(slug: &str, path: &Path) -> Report {
    Report {
        text: format!("removed {slug} ({})", path.display()),
        json: json!({ "status": "ok", "slug": slug, "path": path }),
    }
}

/// Renders a pulled image. The text form is just the image path.
pub fn pulled(image: &Path) -> Report {
    Report {
        text: image.display().to_string(),
        json: json!({ "status": "ok", "image": image }),
    }
}
