//! Kernel version and series identifiers.
//!
//! A `Series` is a release branch like "5.15"; a `KernelVersion` is a
//! concrete patch-level release like "5.15.166". Versions order by
//! component-wise numeric comparison, never lexically, so "5.15.9" sorts
//! below "5.15.100".

use anyhow::{bail, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A kernel release branch identifier, e.g. "6.6".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Series(String);

impl Series {
    /// Parse and validate a series identifier.
    ///
    /// Accepts dotted non-empty numeric components ("5.15", "2.6").
    pub fn new(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("series must not be empty");
        }
        if !s
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        {
            bail!("invalid series '{}': expected dotted numeric identifier like '5.15'", s);
        }
        Ok(Series(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete kernel release, e.g. "5.15.166".
#[derive(Debug, Clone, Eq)]
pub struct KernelVersion {
    raw: String,
    parts: Vec<u64>,
}

impl KernelVersion {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Leading version component ("5" for "5.15.166").
    pub fn major(&self) -> u64 {
        self.parts[0]
    }

    /// Whether this version belongs to the given branch.
    ///
    /// "5.15" matches "5.15" itself and anything under "5.15.".
    pub fn in_series(&self, series: &Series) -> bool {
        self.raw == series.as_str()
            || self
                .raw
                .strip_prefix(series.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl FromStr for KernelVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("kernel version must not be empty");
        }
        let mut parts = Vec::new();
        for component in s.split('.') {
            if component.is_empty() || !component.chars().all(|c| c.is_ascii_digit()) {
                bail!("invalid kernel version '{}': expected numeric dotted components", s);
            }
            let n: u64 = component
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid kernel version '{}': component too large", s))?;
            parts.push(n);
        }
        Ok(KernelVersion {
            raw: s.to_string(),
            parts,
        })
    }
}

impl PartialEq for KernelVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for KernelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Missing trailing components compare as zero ("5.15" == "5.15.0").
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for KernelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
