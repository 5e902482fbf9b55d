//! Source extractor: idempotent unpack of a validated archive.
//!
//! An existing source directory for the exact resolved version is a no-op
//! unless extraction is forced. A partial or stale directory is removed
//! before extracting fresh; the extractor never merges into a prior
//! extraction. A missing expected top-level directory after extraction
//! indicates archive-format drift and is always fatal.

use anyhow::{bail, Context, Result};
use std::fs;

use crate::layout::TreePaths;
use crate::process::{CmdSpec, CommandRunner};
use crate::treefs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    AlreadyExtracted,
    Extracted,
}

pub fn extract_source(
    runner: &dyn CommandRunner,
    paths: &TreePaths,
    force: bool,
) -> Result<ExtractOutcome> {
    if paths.source_dir.exists() && !force {
        return Ok(ExtractOutcome::AlreadyExtracted);
    }

    // Clear any partial (or force-invalidated) extraction for this exact
    // version before unpacking.
    treefs::remove_tree(&paths.source_dir)?;
    fs::create_dir_all(&paths.source_parent).with_context(|| {
        format!("creating source directory '{}'", paths.source_parent.display())
    })?;

    let out = runner.run(&CmdSpec::new("tar").args([
        "-xf",
        &paths.archive.display().to_string(),
        "-C",
        &paths.source_parent.display().to_string(),
    ]))?;
    if !out.success() {
        bail!(
            "extracting '{}' into '{}' failed: {}",
            paths.archive.display(),
            paths.source_parent.display(),
            out.stderr_text()
        );
    }

    if !paths.source_dir.is_dir() {
        bail!(
            "extraction of '{}' did not produce expected directory '{}'; archive layout has drifted",
            paths.archive.display(),
            paths.source_dir.display()
        );
    }

    Ok(ExtractOutcome::Extracted)
}
