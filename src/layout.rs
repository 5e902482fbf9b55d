//! On-disk layout of a build tree.
//!
//! This module only defines WHERE things go, not HOW to get them. Nothing
//! here touches the filesystem, so the planner can derive paths without
//! mutating anything.
//!
//! Layout per resolved version:
//!
//! ```text
//! <base>/<version>/_dl/linux-<version>.tar.xz
//! <base>/<version>/src/linux-<version>/
//! <base>/<version>/build-<arch>/            (or build-<arch>/<toolchain-id>/)
//! ```

use crate::mirror;
use crate::policy::Policy;
use crate::version::KernelVersion;
use std::path::PathBuf;

/// Resolved paths for one build tree. A pure function of the resolved
/// version, the architecture, and (optionally) the toolchain id.
#[derive(Debug, Clone)]
pub struct TreePaths {
    /// `<base>/<version>`
    pub root: PathBuf,
    /// `<base>/<version>/_dl`
    pub download_dir: PathBuf,
    /// `<base>/<version>/_dl/linux-<version>.tar.xz`
    pub archive: PathBuf,
    /// `<base>/<version>/src`
    pub source_parent: PathBuf,
    /// `<base>/<version>/src/linux-<version>`
    pub source_dir: PathBuf,
    /// `<base>/<version>/build-<arch>[/<toolchain-id>]`
    pub build_dir: PathBuf,
}

impl TreePaths {
    /// Derive the tree layout for a resolved version.
    ///
    /// `toolchain_id` is only honored when the policy enables per-toolchain
    /// build directory nesting.
    pub fn resolve(policy: &Policy, version: &KernelVersion, toolchain_id: Option<&str>) -> Self {
        let root = policy.base_dir.join(version.as_str());
        let download_dir = root.join("_dl");
        let archive = download_dir.join(mirror::archive_name(version));
        let source_parent = root.join("src");
        let source_dir = source_parent.join(mirror::extracted_dir_name(version));
        let mut build_dir = root.join(format!("build-{}", policy.arch.name()));
        if policy.per_toolchain_dirs {
            if let Some(id) = toolchain_id {
                build_dir = build_dir.join(id);
            }
        }
        TreePaths {
            root,
            download_dir,
            archive,
            source_parent,
            source_dir,
            build_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Architecture, ForceFlags, LatestMode, MismatchPolicy};

    fn policy(per_toolchain: bool) -> Policy {
        Policy {
            arch: Architecture::Arm64,
            cross_compile: "aarch64-linux-gnu-".to_string(),
            mirror_base: mirror::DEFAULT_MIRROR_BASE.to_string(),
            index_url: crate::resolver::DEFAULT_INDEX_URL.to_string(),
            base_dir: PathBuf::from("/work/kernels"),
            lock_file: PathBuf::from("kernel-versions.toml"),
            config_dir: None,
            strict: false,
            force: ForceFlags::default(),
            latest: LatestMode::Pinned,
            mismatch: MismatchPolicy::Ask,
            per_toolchain_dirs: per_toolchain,
        }
    }

    #[test]
    fn paths_are_keyed_by_version_and_arch() {
        let v = "5.15.166".parse().unwrap();
        let p = TreePaths::resolve(&policy(false), &v, None);
        assert_eq!(p.root, PathBuf::from("/work/kernels/5.15.166"));
        assert_eq!(
            p.archive,
            PathBuf::from("/work/kernels/5.15.166/_dl/linux-5.15.166.tar.xz")
        );
        assert_eq!(
            p.source_dir,
            PathBuf::from("/work/kernels/5.15.166/src/linux-5.15.166")
        );
        assert_eq!(p.build_dir, PathBuf::from("/work/kernels/5.15.166/build-arm64"));
    }

    #[test]
    fn per_toolchain_nesting_adds_one_level() {
        let v = "6.6.63".parse().unwrap();
        let p = TreePaths::resolve(&policy(true), &v, Some("gcc-13"));
        assert_eq!(
            p.build_dir,
            PathBuf::from("/work/kernels/6.6.63/build-arm64/gcc-13")
        );
        // Nesting disabled: toolchain id is ignored.
        let p = TreePaths::resolve(&policy(false), &v, Some("gcc-13"));
        assert_eq!(p.build_dir, PathBuf::from("/work/kernels/6.6.63/build-arm64"));
    }
}
