//! # jkrollout-kernelspec
//!
//! On-disk Jupyter kernel specs backed by container images.
//!
//! - **Descriptor**: the `kernel.json` model, including provisioning metadata.
//! - **Launcher**: the generated script that loads host modules, prepares
//!   GPUs, and `exec`s the container runtime with all arguments forwarded.
//! - **Writer**: stages a complete kernel directory and publishes it with a
//!   single atomic rename.
//! - **Catalog**: lists and removes installed kernels and finds kernels
//!   sharing an overlay.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod catalog;
pub mod descriptor;
pub mod launcher;
mod publish;
pub mod writer;
