//! Filesystem operations on build trees: read-only sealing, unsealing,
//! sealed-tree removal, and the full-kernel-artifact purge.
//!
//! Sealing widens read access (a+r) and strips write bits so a later run
//! cannot silently mutate a prepared tree. A failed seal rolls back to
//! writable so a crash mid-operation cannot leave the tree half-sealed.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File names that indicate a full kernel build rather than a headers-only
/// preparation. These are purged after every preparation: leaving them in
/// place makes downstream module builds demand whole-kernel symbol
/// resolution.
const FULL_BUILD_ARTIFACTS: &[&str] = &[
    "vmlinux",
    "vmlinux.o",
    "vmlinux.a",
    "vmlinuz",
    "System.map",
    "Module.symvers",
];

/// Seal a tree read-only. On failure the tree is restored to writable
/// before the error propagates.
pub fn seal_tree(root: &Path) -> Result<()> {
    if let Err(e) = set_tree_mode(root, Mode::Sealed) {
        let _ = set_tree_mode(root, Mode::Writable);
        return Err(e).with_context(|| format!("sealing '{}'", root.display()));
    }
    Ok(())
}

/// Make a (possibly sealed) tree writable again.
pub fn unseal_tree(root: &Path) -> Result<()> {
    set_tree_mode(root, Mode::Writable)
        .with_context(|| format!("unsealing '{}'", root.display()))
}

/// Remove a tree that may be sealed read-only.
pub fn remove_tree(root: &Path) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    unseal_tree(root)?;
    fs::remove_dir_all(root).with_context(|| format!("removing '{}'", root.display()))
}

/// Delete full-kernel-build byproducts under `root`. Returns what was
/// removed, for diagnostics.
pub fn purge_full_build_artifacts(root: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !root.exists() {
        return Ok(removed);
    }
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if FULL_BUILD_ARTIFACTS.contains(&name.as_ref()) {
            fs::remove_file(entry.path()).with_context(|| {
                format!("purging full-build artifact '{}'", entry.path().display())
            })?;
            removed.push(entry.path().to_path_buf());
        }
    }
    Ok(removed)
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Sealed,
    Writable,
}

fn set_tree_mode(root: &Path, mode: Mode) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    // Sealing chmods children before their directories (contents-first);
    // unsealing must go top-down so read-only directories open up before
    // we descend into them.
    let walker = WalkDir::new(root).contents_first(mode == Mode::Sealed);
    for entry in walker {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        if entry.file_type().is_symlink() {
            continue;
        }
        let md = entry
            .metadata()
            .with_context(|| format!("reading metadata of '{}'", entry.path().display()))?;
        let current = md.permissions().mode();
        let target = match mode {
            // Widen read access, then strip every write bit.
            Mode::Sealed => (current | 0o444) & !0o222,
            Mode::Writable => current | 0o700,
        };
        if target != current {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(target))
                .with_context(|| format!("chmod '{}'", entry.path().display()))?;
        }
    }
    Ok(())
}
