//! Toolchain guard.
//!
//! Fingerprints the active compiler, persists that fingerprint inside the
//! prepared build tree, and arbitrates reuse-vs-rebuild when a later run
//! presents a different compiler. Equivalence is "major-version-soft":
//! the same major is compatible, anything else is a mismatch.
//!
//! Arbitration is abstracted behind [`MismatchDecider`] so the guard is
//! testable without a terminal: the interactive prompt and the fixed
//! non-interactive policies are just different implementations.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::policy::Architecture;
use crate::process::{CmdSpec, CommandRunner};
use crate::version::KernelVersion;

/// Fingerprint metadata file inside a prepared build directory.
pub const FINGERPRINT_FILE: &str = ".ktree-toolchain.json";

/// Recorded identity of the compiler used to prepare a build tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainFingerprint {
    /// Compiler binary as invoked, e.g. "aarch64-linux-gnu-gcc".
    pub binary: String,
    /// First line of `--version`.
    pub version_line: String,
    /// Output of `-dumpversion`, e.g. "12.2.0".
    pub dumpversion: String,
    /// Output of `-dumpmachine`, e.g. "aarch64-linux-gnu".
    pub target_triple: String,
}

impl ToolchainFingerprint {
    /// Query the active compiler for its identity.
    pub fn capture(runner: &dyn CommandRunner, compiler: &str) -> Result<Self> {
        let version = run_query(runner, compiler, "--version")?;
        let version_line = version.lines().next().unwrap_or_default().to_string();
        let dumpversion = run_query(runner, compiler, "-dumpversion")?;
        let target_triple = run_query(runner, compiler, "-dumpmachine")?;
        Ok(ToolchainFingerprint {
            binary: compiler.to_string(),
            version_line,
            dumpversion,
            target_triple,
        })
    }

    pub fn major(&self) -> Result<u64> {
        let first = self.dumpversion.split('.').next().unwrap_or_default();
        first.parse().with_context(|| {
            format!("compiler '{}' reported unparseable version '{}'", self.binary, self.dumpversion)
        })
    }

    /// Major-version-soft, full-version-strict equivalence: identical major
    /// means the prepared tree may be reused as-is.
    pub fn compatible_with(&self, other: &ToolchainFingerprint) -> bool {
        match (self.major(), other.major()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Stable id for per-toolchain build directory nesting, e.g. "gcc-12".
    pub fn ident(&self) -> String {
        match self.major() {
            Ok(major) => format!("gcc-{}", major),
            Err(_) => format!("gcc-{}", self.dumpversion),
        }
    }

    /// The compiler must identify as a toolchain for the selected
    /// architecture. A mismatch here is a broken invocation, not a stale
    /// cache, so it is always fatal.
    pub fn check_target(&self, arch: Architecture) -> Result<()> {
        if self.target_triple.contains(arch.triple_token()) {
            return Ok(());
        }
        bail!(
            "compiler '{}' targets '{}', which is not a {} toolchain (expected triple containing '{}'); \
             check the cross-compile prefix",
            self.binary,
            self.target_triple,
            arch.name(),
            arch.triple_token()
        );
    }
}

fn run_query(runner: &dyn CommandRunner, compiler: &str, flag: &str) -> Result<String> {
    let out = runner.run(&CmdSpec::new(compiler).arg(flag))?;
    if !out.success() {
        bail!("'{} {}' failed: {}", compiler, flag, out.stderr_text());
    }
    Ok(out.stdout_text())
}

/// Load the persisted fingerprint from a build directory, if any.
pub fn load_fingerprint(build_dir: &Path) -> Result<Option<ToolchainFingerprint>> {
    let path = build_dir.join(FINGERPRINT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)
        .with_context(|| format!("reading fingerprint '{}'", path.display()))?;
    let fp = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing fingerprint '{}'", path.display()))?;
    Ok(Some(fp))
}

/// Persist the fingerprint into a build directory.
pub fn store_fingerprint(build_dir: &Path, fp: &ToolchainFingerprint) -> Result<()> {
    let path = build_dir.join(FINGERPRINT_FILE);
    let bytes = serde_json::to_vec_pretty(fp)?;
    fs::write(&path, bytes).with_context(|| format!("writing fingerprint '{}'", path.display()))
}

/// What to do with a prepared tree whose fingerprint mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchChoice {
    /// Delete extracted/prepared state (archive retained) and re-enter
    /// from extraction.
    Rebuild,
    /// Leave the tree untouched.
    Keep,
}

/// Injectable "ask the operator" seam for mismatch arbitration.
pub trait MismatchDecider {
    fn decide(
        &self,
        version: &KernelVersion,
        stored: &ToolchainFingerprint,
        current: &ToolchainFingerprint,
    ) -> Result<MismatchChoice>;
}

/// Fixed non-interactive policy ("always rebuild" / "always keep").
pub struct FixedDecider(pub MismatchChoice);

impl MismatchDecider for FixedDecider {
    fn decide(
        &self,
        _version: &KernelVersion,
        _stored: &ToolchainFingerprint,
        _current: &ToolchainFingerprint,
    ) -> Result<MismatchChoice> {
        Ok(self.0)
    }
}

/// Asks once on stdin. A negative or empty answer keeps the tree.
pub struct PromptDecider;

impl MismatchDecider for PromptDecider {
    fn decide(
        &self,
        version: &KernelVersion,
        stored: &ToolchainFingerprint,
        current: &ToolchainFingerprint,
    ) -> Result<MismatchChoice> {
        print!(
            "[ktree] build tree for {} was prepared with {} ({}), current compiler is {} ({}).\n\
             Rebuild it (archive is kept)? [y/N] ",
            version, stored.binary, stored.dumpversion, current.binary, current.dumpversion
        );
        io::stdout().flush().ok();
        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("reading mismatch answer from stdin")?;
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Ok(MismatchChoice::Rebuild),
            _ => Ok(MismatchChoice::Keep),
        }
    }
}

/// Used when no policy is configured and the run is non-interactive:
/// guessing is not an option, so arbitration itself is the error.
pub struct FailFastDecider;

impl MismatchDecider for FailFastDecider {
    fn decide(
        &self,
        version: &KernelVersion,
        stored: &ToolchainFingerprint,
        current: &ToolchainFingerprint,
    ) -> Result<MismatchChoice> {
        bail!(
            "toolchain mismatch for {} (prepared with {} {}, current {} {}) and no mismatch policy \
             is configured for this non-interactive run; pass --on-mismatch rebuild or --on-mismatch keep",
            version,
            stored.binary,
            stored.dumpversion,
            current.binary,
            current.dumpversion
        );
    }
}

/// Guard verdict for an existing prepared tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Fingerprints are compatible: reuse without disturbing the tree.
    Reuse,
    /// Tree must be deleted (archive retained) and rebuilt from extraction.
    Rebuild,
    /// Operator chose to keep the mismatched tree untouched.
    Keep,
}

/// Arbitrate reuse-vs-rebuild for a previously prepared tree.
pub fn arbitrate(
    strict: bool,
    decider: &dyn MismatchDecider,
    version: &KernelVersion,
    stored: Option<&ToolchainFingerprint>,
    current: &ToolchainFingerprint,
) -> Result<GuardVerdict> {
    let stored = match stored {
        Some(fp) => fp,
        None => {
            // A prepared tree without metadata is an inconsistency.
            if strict {
                bail!(
                    "prepared tree for {} has no persisted toolchain fingerprint; \
                     refusing to reuse it under strict policy",
                    version
                );
            }
            eprintln!(
                "[ktree] warning: prepared tree for {} has no toolchain fingerprint; rebuilding it",
                version
            );
            return Ok(GuardVerdict::Rebuild);
        }
    };

    if stored.compatible_with(current) {
        return Ok(GuardVerdict::Reuse);
    }

    match decider.decide(version, stored, current)? {
        MismatchChoice::Rebuild => Ok(GuardVerdict::Rebuild),
        MismatchChoice::Keep => Ok(GuardVerdict::Keep),
    }
}
