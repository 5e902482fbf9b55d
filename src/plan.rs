//! Planner / dry-run reporter.
//!
//! Computes, for every requested series, the resolved version and the
//! actions a real run would take, using the same resolution logic as the
//! provisioning path but with zero writes and zero mutating network calls
//! (metadata-only probes and read-only archive enumeration are allowed).

use anyhow::Result;
use std::fmt;

use crate::catalog::Catalog;
use crate::fetch;
use crate::layout::TreePaths;
use crate::mirror;
use crate::policy::{LatestMode, Policy};
use crate::prepare;
use crate::process::CommandRunner;
use crate::provision;
use crate::resolver::UpstreamResolver;
use crate::toolchain::{self, ToolchainFingerprint};
use crate::version::{KernelVersion, Series};

/// Current state of the archive stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Missing,
    PresentValid,
    PresentCorrupt,
    /// Not present locally and not retrievable upstream either.
    MissingUpstream,
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveState::Missing => "missing",
            ArchiveState::PresentValid => "present-valid",
            ArchiveState::PresentCorrupt => "present-corrupt",
            ArchiveState::MissingUpstream => "missing-upstream",
        })
    }
}

/// Output-only plan for one series; never persisted.
#[derive(Debug)]
pub struct PlanEntry {
    pub series: Series,
    pub version: KernelVersion,
    pub url: String,
    pub archive: ArchiveState,
    pub extracted: bool,
    pub prepared: bool,
    pub fetch_action: &'static str,
    pub extract_action: &'static str,
    pub prepare_action: &'static str,
}

impl PlanEntry {
    pub fn render(&self) -> String {
        format!(
            "[ktree:{series}] plan\n\
             \x20 version:  {version}\n\
             \x20 url:      {url}\n\
             \x20 archive:  {archive}\n\
             \x20 source:   {source}\n\
             \x20 build:    {build}\n\
             \x20 actions:  fetch={fetch} extract={extract} prepare={prepare}",
            series = self.series,
            version = self.version,
            url = self.url,
            archive = self.archive,
            source = if self.extracted { "extracted" } else { "missing" },
            build = if self.prepared { "prepared" } else { "missing" },
            fetch = self.fetch_action,
            extract = self.extract_action,
            prepare = self.prepare_action,
        )
    }
}

/// Compute the plan for one series without mutating any state.
pub fn plan_series(
    runner: &dyn CommandRunner,
    policy: &Policy,
    catalog: &Catalog,
    resolver: &UpstreamResolver,
    series: &Series,
) -> Result<PlanEntry> {
    let mut version = provision::resolve_version(policy, catalog, resolver, series)?;
    let mut archive_state = archive_state_for(runner, policy, &version)?;

    // Mirror the real run's fallback-on-broken selection.
    if archive_state == ArchiveState::MissingUpstream && policy.latest == LatestMode::LatestOnBroken
    {
        if let Some(alternate) = resolver.newest_available(series)? {
            if alternate != version {
                version = alternate;
                archive_state = archive_state_for(runner, policy, &version)?;
            }
        }
    }

    let current = ToolchainFingerprint::capture(runner, &policy.compiler())?;
    let toolchain_id = current.ident();
    let paths = TreePaths::resolve(policy, &version, Some(&toolchain_id));
    let url = mirror::archive_url(&policy.mirror_base, &version);

    let extracted = paths.source_dir.is_dir();
    let prepared = prepare::is_prepared(&paths.build_dir);

    let fetch_action = match archive_state {
        _ if policy.force.download => "download",
        ArchiveState::PresentValid => "skip",
        ArchiveState::Missing | ArchiveState::PresentCorrupt => "download",
        ArchiveState::MissingUpstream => "skip (missing upstream)",
    };
    let extract_action = if policy.force.extract || !extracted {
        "extract"
    } else {
        "skip"
    };
    let prepare_action = if policy.force.prepare || !prepared {
        "prepare"
    } else {
        match toolchain::load_fingerprint(&paths.build_dir)? {
            Some(stored) if stored.compatible_with(&current) => "skip",
            Some(_) => "prepare (toolchain mismatch)",
            None => "prepare (missing fingerprint)",
        }
    };

    Ok(PlanEntry {
        series: series.clone(),
        version,
        url,
        archive: archive_state,
        extracted,
        prepared,
        fetch_action,
        extract_action,
        prepare_action,
    })
}

fn archive_state_for(
    runner: &dyn CommandRunner,
    policy: &Policy,
    version: &KernelVersion,
) -> Result<ArchiveState> {
    let paths = TreePaths::resolve(policy, version, None);
    if paths.archive.is_file() {
        return Ok(if fetch::archive_is_valid(runner, &paths.archive)? {
            ArchiveState::PresentValid
        } else {
            ArchiveState::PresentCorrupt
        });
    }
    let url = mirror::archive_url(&policy.mirror_base, version);
    if fetch::probe_remote(runner, &url)? {
        Ok(ArchiveState::Missing)
    } else {
        Ok(ArchiveState::MissingUpstream)
    }
}
