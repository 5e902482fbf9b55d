//! Preparation pipeline: turns extracted sources into a sealed,
//! headers-only build directory ready for out-of-tree module builds.
//!
//! Three external build-system invocations run in sequence against the
//! extracted sources, directed at the tree's output directory:
//!
//! 1. baseline configuration — an imported per-kernel configuration if one
//!    is found (arch+version > arch+series > version > series), otherwise
//!    `defconfig`;
//! 2. `olddefconfig` — normalize the configuration against this source tree;
//! 3. `modules_prepare` — generate what out-of-tree compilation needs.
//!
//! After success the toolchain fingerprint is persisted, full-kernel-build
//! byproducts are purged, the build-dir → source-dir symlink is preserved,
//! and the tree is sealed read-only.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::TreePaths;
use crate::policy::{Architecture, Policy};
use crate::process::{CmdSpec, CommandRunner};
use crate::toolchain::{self, ToolchainFingerprint};
use crate::treefs;
use crate::version::{KernelVersion, Series};

/// A build directory counts as prepared only when the generated files are
/// actually present; a marker left by an interrupted run is not trusted.
pub fn is_prepared(build_dir: &Path) -> bool {
    build_dir.join(".config").is_file() && build_dir.join("include/generated/autoconf.h").is_file()
}

/// Locate an externally supplied configuration for this kernel, most
/// specific first: arch+version, arch+series, version, series.
pub fn find_import_config(
    config_dir: &Path,
    arch: Architecture,
    version: &KernelVersion,
    series: &Series,
) -> Option<PathBuf> {
    let candidates = [
        format!("config-{}-{}", arch.name(), version),
        format!("config-{}-{}", arch.name(), series),
        format!("config-{}", version),
        format!("config-{}", series),
    ];
    candidates
        .iter()
        .map(|name| config_dir.join(name))
        .find(|path| path.is_file())
}

/// An imported configuration must encode the expected target architecture.
/// A mismatch is always fatal: preparing with it would produce a build tree
/// that silently targets the wrong machine.
pub fn verify_config_arch(config: &Path, arch: Architecture) -> Result<()> {
    let text = fs::read_to_string(config)
        .with_context(|| format!("reading imported configuration '{}'", config.display()))?;
    let wanted = format!("{}=y", arch.config_symbol());
    if text.lines().any(|line| line.trim() == wanted) {
        return Ok(());
    }
    bail!(
        "imported configuration '{}' does not enable {} and cannot be used for {}; \
         remove it from the import directory or provide a config generated for this architecture",
        config.display(),
        arch.config_symbol(),
        arch.name()
    );
}

/// Run the full pipeline into a fresh build directory.
///
/// Any existing build directory for this tree is removed first (the caller
/// has already decided that reuse is denied or a rebuild was forced).
pub fn prepare_tree(
    runner: &dyn CommandRunner,
    policy: &Policy,
    paths: &TreePaths,
    series: &Series,
    version: &KernelVersion,
    fingerprint: &ToolchainFingerprint,
) -> Result<()> {
    treefs::remove_tree(&paths.build_dir)?;
    fs::create_dir_all(&paths.build_dir)
        .with_context(|| format!("creating build directory '{}'", paths.build_dir.display()))?;

    match policy
        .config_dir
        .as_deref()
        .and_then(|dir| find_import_config(dir, policy.arch, version, series))
    {
        Some(imported) => {
            verify_config_arch(&imported, policy.arch)?;
            println!(
                "[ktree:{}] importing configuration '{}'",
                series,
                imported.display()
            );
            fs::copy(&imported, paths.build_dir.join(".config")).with_context(|| {
                format!("importing configuration '{}'", imported.display())
            })?;
        }
        None => {
            println!("[ktree:{}] generating default configuration", series);
            run_make(runner, policy, paths, "defconfig")?;
        }
    }

    run_make(runner, policy, paths, "olddefconfig")?;
    run_make(runner, policy, paths, "modules_prepare")?;

    if !is_prepared(&paths.build_dir) {
        bail!(
            "pipeline for {} reported success but '{}' is missing generated files \
             (.config, include/generated/autoconf.h)",
            version,
            paths.build_dir.display()
        );
    }

    toolchain::store_fingerprint(&paths.build_dir, fingerprint)?;

    // A headers-only tree must never look like a full kernel build.
    for root in [&paths.build_dir, &paths.source_dir] {
        let purged = treefs::purge_full_build_artifacts(root)?;
        for path in purged {
            println!("[ktree:{}] purged full-build artifact '{}'", series, path.display());
        }
    }

    ensure_source_link(paths)?;

    treefs::seal_tree(&paths.source_dir)?;
    treefs::seal_tree(&paths.build_dir)?;
    Ok(())
}

/// Older series locate absolute source paths during the downstream module
/// build through the `source` symlink the kernel build system leaves in
/// the output directory. Keep it, and recreate it if the build system did
/// not (it must stay a link, never a flattened copy).
fn ensure_source_link(paths: &TreePaths) -> Result<()> {
    let link = paths.build_dir.join("source");
    if fs::symlink_metadata(&link).is_ok() {
        return Ok(());
    }
    std::os::unix::fs::symlink(&paths.source_dir, &link)
        .with_context(|| format!("linking '{}' to '{}'", link.display(), paths.source_dir.display()))
}

fn run_make(
    runner: &dyn CommandRunner,
    policy: &Policy,
    paths: &TreePaths,
    target: &str,
) -> Result<()> {
    let mut cmd = CmdSpec::new("make")
        .args([
            "-C",
            &paths.source_dir.display().to_string(),
            &format!("O={}", paths.build_dir.display()),
            &format!("ARCH={}", policy.arch.kernel_arch()),
        ]);
    if !policy.cross_compile.is_empty() {
        cmd = cmd.arg(format!("CROSS_COMPILE={}", policy.cross_compile));
    }
    cmd = cmd.arg(target);

    let out = runner.run(&cmd)?;
    if !out.success() {
        bail!(
            "make {} failed (source '{}', output '{}'):\n{}",
            target,
            paths.source_dir.display(),
            paths.build_dir.display(),
            out.stderr_text()
        );
    }
    Ok(())
}
