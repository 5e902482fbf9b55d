//! Preflight checks for host tooling.
//!
//! Validates that the host has the external commands a run will shell out
//! to before any directory is touched. This prevents cryptic mid-pipeline
//! failures several stages in.

use anyhow::{bail, Result};

use crate::policy::Policy;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// External tools every run depends on, as (command, package) pairs.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("curl", "curl"),
    ("tar", "tar"),
    ("make", "make"),
];

/// Check that specific tools are available.
///
/// Returns `Err` listing every missing tool and the package that provides
/// it, so one failure reports all gaps at once.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check the standard tool set plus the policy's compiler.
///
/// The compiler name depends on the cross-compile prefix, so it cannot
/// live in the static list.
pub fn check_host_tools(policy: &Policy) -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)?;

    let compiler = policy.compiler();
    if !command_exists(&compiler) {
        if policy.cross_compile.is_empty() {
            bail!("Missing required host tool: {} (install: gcc)", compiler);
        }
        bail!(
            "Missing cross compiler '{}'; check the CROSS_COMPILE prefix '{}'",
            compiler,
            policy.cross_compile
        );
    }

    Ok(())
}
