//! # jkrollout-sdk
//!
//! Public SDK for provisioning container-backed Jupyter kernels from Rust.
//!
//! Two entry points:
//! - [`ProvisionRequestBuilder`](builder::ProvisionRequestBuilder): describes
//!   the kernel to create.
//! - [`Provisioner`](provisioner::Provisioner): ensures the image can run a
//!   kernel and publishes the kernel spec.
//!
//! # Example
//!
//! ```rust,no_run
//! use jkrollout_common::config::ProvisionerConfig;
//! use jkrollout_common::types::ResourceHint;
//! use jkrollout_runtime::invoker::ApptainerRuntime;
//! use jkrollout_sdk::builder::ProvisionRequestBuilder;
//! use jkrollout_sdk::provisioner::Provisioner;
//!
//! # fn main() -> jkrollout_common::error::Result<()> {
//! let config = ProvisionerConfig::load(None)?;
//! let runtime = ApptainerRuntime::detect(&config.runtime);
//! let request = ProvisionRequestBuilder::new("/images/pytorch-2.9.1.sif", "PyTorch 2.9.1")
//!     .resource(ResourceHint::Gpu)
//!     .build()?;
//! let report = Provisioner::new(&runtime, &config).provision(&request)?;
//! println!("{}", report.path.display());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod provisioner;
