//! The `kernel.json` descriptor read by Jupyter front ends.
//!
//! Field names follow the Jupyter kernel spec format. Provisioning details
//! are kept under `metadata.jkrollout`, which front ends ignore.

use std::path::{Path, PathBuf};

use jkrollout_common::constants::CONNECTION_FILE_PLACEHOLDER;
use jkrollout_common::error::{ProvisionError, Result};
use jkrollout_common::types::ResourceHint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provisioning record stored with every managed kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRecord {
    /// Kernel slug.
    pub slug: String,
    /// Image backing the kernel.
    pub image: PathBuf,
    /// Overlay directory bound into the container.
    pub overlay: PathBuf,
    /// Resource class the launcher was generated for.
    pub resource: ResourceHint,
    /// RFC 3339 timestamp of provisioning.
    pub provisioned_at: String,
    /// Version of the tool that wrote the kernel.
    pub tool_version: String,
}

/// Free-form descriptor metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Record written by this tool; absent for foreign kernels.
    #[serde(rename = "jkrollout", default, skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisionRecord>,
    /// Any other metadata keys, preserved verbatim.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A Jupyter kernel spec.
///
/// See <https://jupyter-client.readthedocs.io/en/stable/kernels.html#kernel-specs>.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    /// Command line used to start the kernel.
    pub argv: Vec<String>,
    /// Name shown in the front end's kernel picker.
    pub display_name: String,
    /// Kernel language.
    pub language: String,
    /// Environment variables set for the kernel process.
    #[serde(default)]
    pub env: Map<String, Value>,
    /// Descriptor metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl KernelDescriptor {
    /// Creates a descriptor whose argv runs `launcher` with the connection
    /// file placeholder as the trailing argument.
    #[must_use]
    pub fn new(
        launcher: &Path,
        display_name: impl Into<String>,
        language: impl Into<String>,
        record: ProvisionRecord,
    ) -> Self {
        Self {
            argv: vec![
                launcher.to_string_lossy().into_owned(),
                "-f".into(),
                CONNECTION_FILE_PLACEHOLDER.into(),
            ],
            display_name: display_name.into(),
            language: language.into(),
            env: Map::new(),
            metadata: Metadata {
                provisioning: Some(record),
                other: Map::new(),
            },
        }
    }

    /// Returns the provisioning record, if this kernel is managed.
    #[must_use]
    pub const fn record(&self) -> Option<&ProvisionRecord> {
        self.metadata.provisioning.as_ref()
    }

    /// Serializes the descriptor as pretty JSON with a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Reads a descriptor from a `kernel.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ProvisionError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}
