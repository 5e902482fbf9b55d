//! Upstream release resolver.
//!
//! Discovers the newest version of a series known to the remote release
//! index AND physically retrievable at the mirror. The index is fetched at
//! most once per run; candidates are probed newest-to-oldest with a
//! metadata-only request. This is only used for "latest" discovery — the
//! lock document stays the primary source of truth.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::cell::RefCell;

use crate::fetch;
use crate::mirror;
use crate::policy::Policy;
use crate::process::{CmdSpec, CommandRunner};
use crate::version::{KernelVersion, Series};

pub const DEFAULT_INDEX_URL: &str = "https://www.kernel.org/releases.json";

#[derive(Debug, Deserialize)]
struct IndexDoc {
    releases: Vec<IndexRelease>,
}

#[derive(Debug, Deserialize)]
struct IndexRelease {
    version: String,
}

/// Release-index client, caching the fetched index for the run's lifetime.
pub struct UpstreamResolver<'a> {
    runner: &'a dyn CommandRunner,
    index_url: String,
    mirror_base: String,
    cache: RefCell<Option<Vec<KernelVersion>>>,
}

impl<'a> UpstreamResolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner, policy: &Policy) -> Self {
        UpstreamResolver {
            runner,
            index_url: policy.index_url.clone(),
            mirror_base: policy.mirror_base.clone(),
            cache: RefCell::new(None),
        }
    }

    /// Every final release the index lists, ascending. Pre-release entries
    /// (e.g. "6.12-rc5") are not valid versions and are ignored.
    fn index_versions(&self) -> Result<Vec<KernelVersion>> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }

        let out = self
            .runner
            .run(&CmdSpec::new("curl").args(["-sfL", &self.index_url]))?;
        if !out.success() {
            bail!(
                "fetching release index '{}' failed: {}",
                self.index_url,
                out.stderr_text()
            );
        }
        let doc: IndexDoc = serde_json::from_slice(&out.stdout)
            .with_context(|| format!("parsing release index '{}'", self.index_url))?;

        let mut versions: Vec<KernelVersion> = doc
            .releases
            .iter()
            .filter_map(|r| r.version.parse().ok())
            .collect();
        versions.sort();

        *self.cache.borrow_mut() = Some(versions.clone());
        Ok(versions)
    }

    /// Newest version of `series` that is listed upstream and whose archive
    /// actually exists at the mirror. `Ok(None)` when the index omits the
    /// series (e.g. an end-of-life branch) or no listed candidate is
    /// retrievable — callers keep the pinned version in that case.
    pub fn newest_available(&self, series: &Series) -> Result<Option<KernelVersion>> {
        let candidates: Vec<KernelVersion> = self
            .index_versions()?
            .into_iter()
            .filter(|v| v.in_series(series))
            .collect();

        for candidate in candidates.iter().rev() {
            let url = mirror::archive_url(&self.mirror_base, candidate);
            if fetch::probe_remote(self.runner, &url)? {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }
}
