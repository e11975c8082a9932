//! # jkrollout-runtime
//!
//! Everything that talks to the container runtime:
//! - **Invoker**: runs a command inside an image with binds, environment,
//!   GPU passthrough and a hard deadline.
//! - **Detection**: probes whether an image (plus overlay) exposes the
//!   kernel shim.
//! - **Overlay**: installs the shim into a host-side overlay directory and
//!   verifies the result.
//! - **Pull**: materializes an image file from a remote source.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod detect;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod invoker;
pub mod logs;
pub mod overlay;
pub mod pull;
