//! Run policy: the immutable configuration snapshot for one invocation.
//!
//! Everything that used to be ambient state (force flags, strictness,
//! latest-resolution modes) lives in one `Policy` value constructed at
//! startup and threaded explicitly into every component.

use anyhow::{bail, Result};
use std::path::PathBuf;

/// Target architectures supported for tree preparation.
///
/// Unknown values are rejected at the boundary; every variant carries its
/// kernel ARCH= value, the token expected in the compiler's target triple,
/// and the .config symbol that an imported configuration must enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Arm64,
    Arm,
    Riscv64,
    LoongArch64,
}

impl Architecture {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            "arm" => Ok(Architecture::Arm),
            "riscv64" | "riscv" => Ok(Architecture::Riscv64),
            "loongarch64" | "loongarch" => Ok(Architecture::LoongArch64),
            other => bail!(
                "unsupported architecture '{}'; expected one of: x86_64, arm64, arm, riscv64, loongarch64",
                other
            ),
        }
    }

    /// Canonical name, used in CLI output and build directory names.
    pub fn name(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
            Architecture::Arm => "arm",
            Architecture::Riscv64 => "riscv64",
            Architecture::LoongArch64 => "loongarch64",
        }
    }

    /// Value passed as ARCH= to the kernel build system.
    pub fn kernel_arch(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
            Architecture::Arm => "arm",
            Architecture::Riscv64 => "riscv",
            Architecture::LoongArch64 => "loongarch",
        }
    }

    /// Token the compiler's target triple must contain for this arch.
    pub fn triple_token(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "aarch64",
            Architecture::Arm => "arm",
            Architecture::Riscv64 => "riscv64",
            Architecture::LoongArch64 => "loongarch64",
        }
    }

    /// Config symbol an imported .config must enable for this arch.
    pub fn config_symbol(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "CONFIG_X86_64",
            Architecture::Arm64 => "CONFIG_ARM64",
            Architecture::Arm => "CONFIG_ARM",
            Architecture::Riscv64 => "CONFIG_RISCV",
            Architecture::LoongArch64 => "CONFIG_LOONGARCH",
        }
    }
}

/// Per-stage force flags. `all()` is the combined "force everything" flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceFlags {
    pub download: bool,
    pub extract: bool,
    pub prepare: bool,
}

impl ForceFlags {
    pub fn all() -> Self {
        ForceFlags {
            download: true,
            extract: true,
            prepare: true,
        }
    }
}

/// How the resolved version relates to the pinned catalog entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LatestMode {
    /// Use the pinned catalog version only.
    #[default]
    Pinned,
    /// Prefer the newest retrievable upstream version for every series.
    LatestAll,
    /// Use the pinned version, but fall back to the newest retrievable
    /// version when the pinned archive is missing from the mirror.
    LatestOnBroken,
}

/// Non-interactive arbitration for toolchain mismatches on prepared trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Ask the operator once (requires an interactive terminal).
    #[default]
    Ask,
    /// Always delete the tree and rebuild from extraction.
    Rebuild,
    /// Always keep the existing tree untouched.
    Keep,
}

impl MismatchPolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(MismatchPolicy::Ask),
            "rebuild" => Ok(MismatchPolicy::Rebuild),
            "keep" => Ok(MismatchPolicy::Keep),
            other => bail!("unsupported mismatch policy '{}'; expected rebuild, keep or ask", other),
        }
    }
}

/// Immutable configuration snapshot for one run. Never mutated after parsing.
#[derive(Debug, Clone)]
pub struct Policy {
    pub arch: Architecture,
    /// Cross-toolchain prefix, e.g. "aarch64-linux-gnu-". Empty for native.
    pub cross_compile: String,
    /// Mirror base URL the archive path derivation is rooted at.
    pub mirror_base: String,
    /// Upstream release index URL (latest-mode discovery only).
    pub index_url: String,
    /// Base directory all build trees live under.
    pub base_dir: PathBuf,
    /// Release lock document path.
    pub lock_file: PathBuf,
    /// External per-kernel configuration import directory.
    pub config_dir: Option<PathBuf>,
    pub strict: bool,
    pub force: ForceFlags,
    pub latest: LatestMode,
    pub mismatch: MismatchPolicy,
    /// Nest build directories one level deeper under a compiler id.
    pub per_toolchain_dirs: bool,
}

impl Policy {
    /// The compiler binary this run fingerprints and builds with.
    pub fn compiler(&self) -> String {
        format!("{}gcc", self.cross_compile)
    }
}
