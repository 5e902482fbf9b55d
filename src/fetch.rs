//! Artifact fetcher: obtains a validated local copy of a versioned archive.
//!
//! Contract (per version):
//! 1. an existing local archive is trusted only if its contents enumerate
//!    cleanly; a corrupt one is deleted and treated as absent (fatal under
//!    strict policy);
//! 2. before downloading, remote existence is confirmed with a
//!    metadata-only probe; absence is a distinguishable skip, not an error
//!    (fatal under strict policy);
//! 3. after a download the archive is validated again; one corrupt
//!    transfer triggers exactly one re-download; a second corrupt transfer
//!    is fatal regardless of strictness.
//!
//! With fallback-on-broken enabled, a pinned version missing from the
//! mirror is replaced by the newest retrievable version of the same series
//! (which must differ from the pinned one), and the finally-selected
//! version is reported to the caller.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::TreePaths;
use crate::mirror;
use crate::policy::{LatestMode, Policy};
use crate::process::{CmdSpec, CommandRunner};
use crate::resolver::UpstreamResolver;
use crate::version::{KernelVersion, Series};

/// Result of fetching one series' archive.
#[derive(Debug)]
pub enum FetchOutcome {
    /// A validated archive is on disk for the (possibly fallback) version.
    Ready {
        version: KernelVersion,
        archive: PathBuf,
    },
    /// The mirror has no archive for this version; nothing was downloaded.
    Skipped { version: KernelVersion, url: String },
}

enum VersionFetch {
    Ready(PathBuf),
    Missing(String),
}

/// Metadata-only existence check against the mirror.
///
/// `Ok(false)` means the server answered and the archive is not there
/// (curl --fail exits 22 on an HTTP error); transport failures are errors.
pub fn probe_remote(runner: &dyn CommandRunner, url: &str) -> Result<bool> {
    let out = runner.run(&CmdSpec::new("curl").args(["-sfIL", "-o", "/dev/null", url]))?;
    match out.code {
        Some(0) => Ok(true),
        Some(22) => Ok(false),
        _ => bail!("probing '{}' failed: {}", url, out.stderr_text()),
    }
}

/// Validate an archive by enumerating its contents.
pub fn archive_is_valid(runner: &dyn CommandRunner, archive: &Path) -> Result<bool> {
    let out = runner.run(&CmdSpec::new("tar").args(["-tf", &archive.display().to_string()]))?;
    Ok(out.success())
}

fn download(runner: &dyn CommandRunner, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating download directory '{}'", parent.display()))?;
    }
    let out = runner.run(
        &CmdSpec::new("curl").args(["-fSL", "--retry", "3", "-o", &dest.display().to_string(), url]),
    )?;
    if !out.success() {
        bail!("downloading '{}' failed: {}", url, out.stderr_text());
    }
    Ok(())
}

/// Fetch the archive for `pinned`, applying force, strictness and
/// fallback-on-broken policy. The outcome names the finally-selected
/// version, which may differ from `pinned`.
pub fn fetch_archive(
    runner: &dyn CommandRunner,
    policy: &Policy,
    resolver: &UpstreamResolver,
    series: &Series,
    pinned: &KernelVersion,
) -> Result<FetchOutcome> {
    let url = match try_fetch_version(runner, policy, pinned)? {
        VersionFetch::Ready(archive) => {
            return Ok(FetchOutcome::Ready {
                version: pinned.clone(),
                archive,
            })
        }
        VersionFetch::Missing(url) => url,
    };

    if policy.latest == LatestMode::LatestOnBroken {
        if let Some(alternate) = resolver.newest_available(series)? {
            if alternate != *pinned {
                println!(
                    "[ktree:{}] pinned {} is not on the mirror; falling back to {}",
                    series, pinned, alternate
                );
                match try_fetch_version(runner, policy, &alternate)? {
                    VersionFetch::Ready(archive) => {
                        return Ok(FetchOutcome::Ready {
                            version: alternate,
                            archive,
                        })
                    }
                    VersionFetch::Missing(alt_url) => {
                        // Probed retrievable moments ago; treat as missing.
                        if policy.strict {
                            bail!(
                                "fallback archive for {} vanished from '{}'",
                                alternate,
                                alt_url
                            );
                        }
                        return Ok(FetchOutcome::Skipped {
                            version: alternate,
                            url: alt_url,
                        });
                    }
                }
            }
        }
    }

    if policy.strict {
        bail!("no archive for {} at '{}'", pinned, url);
    }
    Ok(FetchOutcome::Skipped {
        version: pinned.clone(),
        url,
    })
}

fn try_fetch_version(
    runner: &dyn CommandRunner,
    policy: &Policy,
    version: &KernelVersion,
) -> Result<VersionFetch> {
    let paths = TreePaths::resolve(policy, version, None);
    let archive = paths.archive;
    let url = mirror::archive_url(&policy.mirror_base, version);

    if archive.exists() {
        if policy.force.download {
            fs::remove_file(&archive)
                .with_context(|| format!("removing '{}' for forced re-download", archive.display()))?;
        } else if archive_is_valid(runner, &archive)? {
            return Ok(VersionFetch::Ready(archive));
        } else if policy.strict {
            bail!(
                "existing archive '{}' failed content enumeration",
                archive.display()
            );
        } else {
            eprintln!(
                "[ktree] archive '{}' is corrupt; deleting and re-downloading",
                archive.display()
            );
            fs::remove_file(&archive)
                .with_context(|| format!("removing corrupt archive '{}'", archive.display()))?;
        }
    }

    if !probe_remote(runner, &url)? {
        return Ok(VersionFetch::Missing(url));
    }

    download(runner, &url, &archive)?;
    if archive_is_valid(runner, &archive)? {
        return Ok(VersionFetch::Ready(archive));
    }

    // Exactly one automatic re-download on corruption.
    eprintln!(
        "[ktree] downloaded archive '{}' is corrupt; retrying once",
        archive.display()
    );
    fs::remove_file(&archive)
        .with_context(|| format!("removing corrupt archive '{}'", archive.display()))?;
    download(runner, &url, &archive)?;
    if archive_is_valid(runner, &archive)? {
        return Ok(VersionFetch::Ready(archive));
    }

    let _ = fs::remove_file(&archive);
    bail!(
        "archive from '{}' failed validation twice; not retrying further",
        url
    );
}
