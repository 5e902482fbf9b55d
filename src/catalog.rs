//! Version catalog: the trusted local release lock document.
//!
//! The lock document pins each series to one concrete version:
//!
//! ```toml
//! [[release]]
//! series = "5.15"
//! version = "5.15.166"
//!
//! [[release]]
//! series = "6.6"
//! version = "6.6.63"
//! ```
//!
//! No network access happens here. Duplicate entries for a series resolve
//! to the highest version by component-wise comparison.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::version::{KernelVersion, Series};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LockDoc {
    #[serde(default)]
    release: Vec<LockEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LockEntry {
    series: String,
    version: String,
}

/// Parsed release lock document.
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
    entries: BTreeMap<Series, KernelVersion>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading release lock document '{}'", path.display()))?;
        let doc: LockDoc = toml::from_str(&text)
            .with_context(|| format!("parsing release lock document '{}'", path.display()))?;

        let mut entries: BTreeMap<Series, KernelVersion> = BTreeMap::new();
        for entry in doc.release {
            let series = Series::new(&entry.series)
                .with_context(|| format!("invalid lock entry in '{}'", path.display()))?;
            let version: KernelVersion = entry
                .version
                .parse()
                .with_context(|| format!("invalid lock entry in '{}'", path.display()))?;
            if !version.in_series(&series) {
                bail!(
                    "invalid lock entry in '{}': version {} does not belong to series {}",
                    path.display(),
                    version,
                    series
                );
            }
            match entries.get(&series) {
                Some(existing) if *existing >= version => {}
                _ => {
                    entries.insert(series, version);
                }
            }
        }

        Ok(Catalog {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Pinned version for a series, or `None` when the series is unlisted.
    pub fn pinned(&self, series: &Series) -> Option<&KernelVersion> {
        self.entries.get(series)
    }

    /// Pinned version for a series; hard failure when absent.
    pub fn resolve(&self, series: &Series) -> Result<&KernelVersion> {
        self.pinned(series).ok_or_else(|| {
            anyhow::anyhow!(
                "no release for series {} in '{}'",
                series,
                self.path.display()
            )
        })
    }

    /// All series in the document, in sorted order.
    pub fn series(&self) -> Vec<Series> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
