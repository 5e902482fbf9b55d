//! Shared infrastructure for provisioning prepared Linux kernel build trees.
//!
//! Given a lock file pinning kernel series to exact versions, this crate
//! fetches the matching kernel.org tarballs, extracts them, runs the
//! configuration targets needed for out-of-tree module builds, and seals
//! the result read-only. Every stage is idempotent: a rerun over an
//! already-provisioned tree is a fast no-op.
//!
//! # Pipeline
//!
//! ```text
//! catalog (kernel-versions.toml)
//!     │ resolve series -> pinned version
//!     ▼
//! fetch ── curl probe + download, tar -tf validation
//!     ▼
//! extract ── tar -xf into <base>/<version>/src/
//!     ▼
//! toolchain guard ── gcc fingerprint vs the one stored in the tree
//!     ▼
//! prepare ── make defconfig / olddefconfig / modules_prepare
//!     ▼
//! seal ── trees chmod'd read-only, full-build artifacts purged
//! ```
//!
//! External commands run through the [`process::CommandRunner`] trait so
//! the whole pipeline is testable against a scripted runner without
//! network access or a real kernel tree.

pub mod catalog;
pub mod extract;
pub mod fetch;
pub mod layout;
pub mod mirror;
pub mod plan;
pub mod policy;
pub mod preflight;
pub mod prepare;
pub mod process;
pub mod provision;
pub mod resolver;
pub mod toolchain;
pub mod treefs;
pub mod version;

pub use policy::{Architecture, Policy};
pub use process::{CommandRunner, HostRunner};
pub use version::{KernelVersion, Series};
