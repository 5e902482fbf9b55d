//! Per-series orchestration.
//!
//! Stages for one series run strictly in order: catalog resolution →
//! fetch → extract → toolchain check → prepare. Different series are
//! independent (disjoint directory trees) and run sequentially in the
//! requested order. Strict mode aborts the run at the first failing
//! series; lenient mode reports the failure and moves on.

use anyhow::{Context, Result};

use crate::catalog::Catalog;
use crate::extract;
use crate::fetch::{self, FetchOutcome};
use crate::layout::TreePaths;
use crate::policy::{LatestMode, Policy};
use crate::prepare;
use crate::process::CommandRunner;
use crate::resolver::UpstreamResolver;
use crate::toolchain::{self, GuardVerdict, MismatchDecider, ToolchainFingerprint};
use crate::treefs;
use crate::version::{KernelVersion, Series};

/// Final disposition of one series.
#[derive(Debug)]
pub enum SeriesOutcome {
    /// The pipeline ran and produced a sealed tree.
    Prepared,
    /// An existing prepared tree was compatible and reused untouched.
    Reused,
    /// A mismatched tree was deliberately kept untouched.
    KeptOnMismatch,
    /// The mirror has no archive for this version; nothing was provisioned.
    SkippedMissingArchive { url: String },
}

#[derive(Debug)]
pub struct SeriesReport {
    pub series: Series,
    pub version: KernelVersion,
    pub outcome: SeriesOutcome,
}

impl SeriesReport {
    /// Whether the series ended with a usable prepared tree.
    pub fn provisioned(&self) -> bool {
        matches!(self.outcome, SeriesOutcome::Prepared | SeriesOutcome::Reused)
    }
}

/// Apply latest-resolution policy on top of the pinned catalog entry.
///
/// Pinned and latest-on-broken modes resolve from the catalog alone
/// (fallback happens later, at fetch time, and only when the pinned
/// archive is broken). Latest-all prefers the newest retrievable upstream
/// version and keeps the pinned one when the index omits the series; the
/// resolver is the sole source of truth only for series the catalog does
/// not pin at all.
pub fn resolve_version(
    policy: &Policy,
    catalog: &Catalog,
    resolver: &UpstreamResolver,
    series: &Series,
) -> Result<KernelVersion> {
    match policy.latest {
        LatestMode::Pinned | LatestMode::LatestOnBroken => catalog.resolve(series).cloned(),
        LatestMode::LatestAll => {
            let pinned = catalog.pinned(series).cloned();
            match resolver.newest_available(series) {
                Ok(Some(newest)) => Ok(newest),
                Ok(None) => pinned.ok_or_else(|| {
                    anyhow::anyhow!(
                        "series {} is not pinned in '{}' and not listed upstream",
                        series,
                        policy.lock_file.display()
                    )
                }),
                Err(err) => {
                    if policy.strict {
                        return Err(err);
                    }
                    match pinned {
                        Some(version) => {
                            eprintln!(
                                "[ktree:{}] warning: release index unavailable ({:#}); keeping pinned {}",
                                series, err, version
                            );
                            Ok(version)
                        }
                        None => Err(err),
                    }
                }
            }
        }
    }
}

/// Provision one series end to end.
pub fn provision_series(
    runner: &dyn CommandRunner,
    decider: &dyn MismatchDecider,
    policy: &Policy,
    catalog: &Catalog,
    resolver: &UpstreamResolver,
    series: &Series,
) -> Result<SeriesReport> {
    let pinned = resolve_version(policy, catalog, resolver, series)?;
    println!("[ktree:{}] resolved version {}", series, pinned);

    let (version, archive) = match fetch::fetch_archive(runner, policy, resolver, series, &pinned)?
    {
        FetchOutcome::Ready { version, archive } => (version, archive),
        FetchOutcome::Skipped { version, url } => {
            eprintln!(
                "[ktree:{}] no archive for {} at '{}'; skipping this series",
                series, version, url
            );
            return Ok(SeriesReport {
                series: series.clone(),
                version,
                outcome: SeriesOutcome::SkippedMissingArchive { url },
            });
        }
    };
    if version != pinned {
        println!("[ktree:{}] selected {} instead of pinned {}", series, version, pinned);
    }

    let current = ToolchainFingerprint::capture(runner, &policy.compiler())
        .with_context(|| format!("fingerprinting compiler '{}'", policy.compiler()))?;
    current.check_target(policy.arch)?;
    let toolchain_id = current.ident();
    let paths = TreePaths::resolve(policy, &version, Some(&toolchain_id));
    debug_assert_eq!(paths.archive, archive);

    extract::extract_source(runner, &paths, policy.force.extract)?;

    if prepare::is_prepared(&paths.build_dir) && !policy.force.prepare {
        let stored = toolchain::load_fingerprint(&paths.build_dir)?;
        match toolchain::arbitrate(policy.strict, decider, &version, stored.as_ref(), &current)? {
            GuardVerdict::Reuse => {
                println!(
                    "[ktree:{}] reusing prepared tree '{}'",
                    series,
                    paths.build_dir.display()
                );
                return Ok(SeriesReport {
                    series: series.clone(),
                    version,
                    outcome: SeriesOutcome::Reused,
                });
            }
            GuardVerdict::Keep => {
                println!(
                    "[ktree:{}] keeping mismatched tree '{}' untouched",
                    series,
                    paths.build_dir.display()
                );
                return Ok(SeriesReport {
                    series: series.clone(),
                    version,
                    outcome: SeriesOutcome::KeptOnMismatch,
                });
            }
            GuardVerdict::Rebuild => {
                // Archive retained; extracted and prepared state is
                // destroyed so the pipeline re-enters from extraction.
                println!("[ktree:{}] rebuilding tree for {}", series, version);
                treefs::remove_tree(&paths.source_dir)?;
                treefs::remove_tree(&paths.build_dir)?;
                extract::extract_source(runner, &paths, false)?;
            }
        }
    }

    prepare::prepare_tree(runner, policy, &paths, series, &version, &current)?;
    println!(
        "[ktree:{}] prepared '{}'",
        series,
        paths.build_dir.display()
    );
    Ok(SeriesReport {
        series: series.clone(),
        version,
        outcome: SeriesOutcome::Prepared,
    })
}

/// Aggregate result of one invocation.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<SeriesReport>,
    pub failures: Vec<(Series, anyhow::Error)>,
}

impl RunSummary {
    /// A run only counts as fully successful when every requested series
    /// ended with a usable tree (prepared, reused, or deliberately kept).
    pub fn fully_successful(&self) -> bool {
        self.failures.is_empty()
            && self
                .reports
                .iter()
                .all(|r| !matches!(r.outcome, SeriesOutcome::SkippedMissingArchive { .. }))
    }
}

/// Provision every requested series in order.
pub fn run(
    runner: &dyn CommandRunner,
    decider: &dyn MismatchDecider,
    policy: &Policy,
    catalog: &Catalog,
    series_list: &[Series],
) -> Result<RunSummary> {
    let resolver = UpstreamResolver::new(runner, policy);
    let mut summary = RunSummary::default();

    for series in series_list {
        match provision_series(runner, decider, policy, catalog, &resolver, series) {
            Ok(report) => summary.reports.push(report),
            Err(err) => {
                if policy.strict {
                    return Err(err.context(format!("provisioning series {}", series)));
                }
                eprintln!("[ktree:{}] failed: {:#}", series, err);
                summary.failures.push((series.clone(), err));
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Architecture, ForceFlags, MismatchPolicy};
    use crate::process::fake::{fail, ok, ok_with_stdout, ScriptedRunner};
    use crate::toolchain::FailFastDecider;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn policy(base: &Path) -> Policy {
        Policy {
            arch: Architecture::X86_64,
            cross_compile: String::new(),
            mirror_base: "https://mirror/kernel".to_string(),
            index_url: "https://index/releases.json".to_string(),
            base_dir: base.join("kernels"),
            lock_file: base.join("kernel-versions.toml"),
            config_dir: None,
            strict: false,
            force: ForceFlags::default(),
            latest: LatestMode::Pinned,
            mismatch: MismatchPolicy::Ask,
            per_toolchain_dirs: false,
        }
    }

    fn catalog_with(base: &Path, body: &str) -> Catalog {
        let path = base.join("kernel-versions.toml");
        fs::write(&path, body).unwrap();
        Catalog::load(&path).unwrap()
    }

    fn script_compiler(runner: &ScriptedRunner, dumpversion: &str) {
        runner.on(
            "gcc",
            &["--version"],
            vec![ok_with_stdout(&format!("gcc (GCC) {}", dumpversion))],
        );
        runner.on("gcc", &["-dumpversion"], vec![ok_with_stdout(dumpversion)]);
        runner.on("gcc", &["-dumpmachine"], vec![ok_with_stdout("x86_64-linux-gnu")]);
    }

    /// Scripts a complete happy-path provisioning for 5.15.166.
    fn script_full_run(runner: &ScriptedRunner, policy: &Policy) -> TreePaths {
        let version: KernelVersion = "5.15.166".parse().unwrap();
        let paths = TreePaths::resolve(policy, &version, Some("gcc-12"));
        script_compiler(runner, "12.2.0");
        runner.on("curl", &["-sfIL"], vec![ok()]);
        let archive = paths.archive.clone();
        runner.on_with_effect("curl", &["-fSL"], vec![ok()], move || {
            fs::write(&archive, b"tarball").unwrap();
        });
        runner.on("tar", &["-tf"], vec![ok()]);
        let source_dir = paths.source_dir.clone();
        runner.on_with_effect("tar", &["-xf"], vec![ok()], move || {
            fs::create_dir_all(&source_dir).unwrap();
            fs::write(source_dir.join("Makefile"), "VERSION = 5\n").unwrap();
        });
        let bd = paths.build_dir.clone();
        runner.on_with_effect("make", &["defconfig"], vec![ok()], move || {
            fs::write(bd.join(".config"), "CONFIG_X86_64=y\n").unwrap();
        });
        let bd = paths.build_dir.clone();
        runner.on_with_effect("make", &["modules_prepare"], vec![ok()], move || {
            fs::create_dir_all(bd.join("include/generated")).unwrap();
            fs::write(bd.join("include/generated/autoconf.h"), "").unwrap();
        });
        paths
    }

    #[test]
    fn first_run_prepares_second_run_reuses_without_side_effects() {
        let tmp = TempDir::new().unwrap();
        let policy = policy(tmp.path());
        let catalog = catalog_with(
            tmp.path(),
            "[[release]]\nseries = \"5.15\"\nversion = \"5.15.166\"\n",
        );
        let series = vec![Series::new("5.15").unwrap()];

        let runner = ScriptedRunner::new();
        let paths = script_full_run(&runner, &policy);
        let summary = run(&runner, &FailFastDecider, &policy, &catalog, &series).unwrap();
        assert!(summary.fully_successful());
        assert!(matches!(summary.reports[0].outcome, SeriesOutcome::Prepared));
        assert!(prepare::is_prepared(&paths.build_dir));

        // Second run: only compiler queries and archive enumeration are
        // scripted. Any download, extraction or make would error out.
        let runner = ScriptedRunner::new();
        script_compiler(&runner, "12.4.1"); // same major: compatible
        runner.on("tar", &["-tf"], vec![ok()]);

        let summary = run(&runner, &FailFastDecider, &policy, &catalog, &series).unwrap();
        assert!(matches!(summary.reports[0].outcome, SeriesOutcome::Reused));
        assert_eq!(runner.count_calls_to("curl"), 0);
        assert_eq!(runner.count_calls_to("make"), 0);
    }

    #[test]
    fn pinned_resolution_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let policy = policy(tmp.path());
        let catalog = catalog_with(
            tmp.path(),
            "[[release]]\nseries = \"5.15\"\nversion = \"5.15.166\"\n",
        );
        let series = Series::new("5.15").unwrap();

        let runner = ScriptedRunner::new();
        let resolver = UpstreamResolver::new(&runner, &policy);
        let a = resolve_version(&policy, &catalog, &resolver, &series).unwrap();
        let b = resolve_version(&policy, &catalog, &resolver, &series).unwrap();
        assert_eq!(a, b);
        // Pinned mode consults no network at all.
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn mismatched_tree_is_kept_untouched_under_keep_policy() {
        let tmp = TempDir::new().unwrap();
        let policy = policy(tmp.path());
        let catalog = catalog_with(
            tmp.path(),
            "[[release]]\nseries = \"5.15\"\nversion = \"5.15.166\"\n",
        );
        let series = vec![Series::new("5.15").unwrap()];

        // First run prepares with gcc 12.
        let runner = ScriptedRunner::new();
        let paths = script_full_run(&runner, &policy);
        run(&runner, &FailFastDecider, &policy, &catalog, &series).unwrap();
        let before = fs::read(paths.build_dir.join(".config")).unwrap();

        // Second run presents gcc 13; fixed "keep" policy preserves the tree.
        let runner = ScriptedRunner::new();
        script_compiler(&runner, "13.1.0");
        runner.on("tar", &["-tf"], vec![ok()]);
        let keep = crate::toolchain::FixedDecider(crate::toolchain::MismatchChoice::Keep);
        let summary = run(&runner, &keep, &policy, &catalog, &series).unwrap();
        assert!(matches!(
            summary.reports[0].outcome,
            SeriesOutcome::KeptOnMismatch
        ));
        assert_eq!(fs::read(paths.build_dir.join(".config")).unwrap(), before);
        assert_eq!(runner.count_calls_to("make"), 0);
    }

    #[test]
    fn mismatched_tree_is_rebuilt_under_rebuild_policy() {
        let tmp = TempDir::new().unwrap();
        let policy = policy(tmp.path());
        let catalog = catalog_with(
            tmp.path(),
            "[[release]]\nseries = \"5.15\"\nversion = \"5.15.166\"\n",
        );
        let series = vec![Series::new("5.15").unwrap()];

        let runner = ScriptedRunner::new();
        let paths = script_full_run(&runner, &policy);
        run(&runner, &FailFastDecider, &policy, &catalog, &series).unwrap();

        // gcc 13 now; rebuild policy deletes and re-prepares. The build
        // directory moves to gcc-13 because fingerprints differ, so script
        // a fresh pipeline against the new paths.
        let runner = ScriptedRunner::new();
        script_compiler(&runner, "13.1.0");
        runner.on("tar", &["-tf"], vec![ok()]);
        let version: KernelVersion = "5.15.166".parse().unwrap();
        let new_paths = TreePaths::resolve(&policy, &version, Some("gcc-13"));
        assert_eq!(new_paths.build_dir, paths.build_dir); // nesting disabled
        let source_dir = new_paths.source_dir.clone();
        runner.on_with_effect("tar", &["-xf"], vec![ok()], move || {
            fs::create_dir_all(&source_dir).unwrap();
        });
        let bd = new_paths.build_dir.clone();
        runner.on_with_effect("make", &["defconfig"], vec![ok()], move || {
            fs::write(bd.join(".config"), "CONFIG_X86_64=y\n").unwrap();
        });
        let bd = new_paths.build_dir.clone();
        runner.on_with_effect("make", &["modules_prepare"], vec![ok()], move || {
            fs::create_dir_all(bd.join("include/generated")).unwrap();
            fs::write(bd.join("include/generated/autoconf.h"), "").unwrap();
        });

        let rebuild = crate::toolchain::FixedDecider(crate::toolchain::MismatchChoice::Rebuild);
        let summary = run(&runner, &rebuild, &policy, &catalog, &series).unwrap();
        assert!(matches!(summary.reports[0].outcome, SeriesOutcome::Prepared));
        // Archive retained across the rebuild.
        assert!(new_paths.archive.exists());
        let stored = toolchain::load_fingerprint(&new_paths.build_dir).unwrap().unwrap();
        assert_eq!(stored.dumpversion, "13.1.0");
    }

    #[test]
    fn lenient_run_continues_past_a_failing_series() {
        let tmp = TempDir::new().unwrap();
        let policy = policy(tmp.path());
        let catalog = catalog_with(
            tmp.path(),
            "[[release]]\nseries = \"5.15\"\nversion = \"5.15.166\"\n",
        );
        // 4.19 is not in the catalog: resolution fails; 5.15 succeeds.
        let series = vec![Series::new("4.19").unwrap(), Series::new("5.15").unwrap()];

        let runner = ScriptedRunner::new();
        script_full_run(&runner, &policy);
        let summary = run(&runner, &FailFastDecider, &policy, &catalog, &series).unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.reports.len(), 1);
        assert!(!summary.fully_successful());
        assert!(matches!(summary.reports[0].outcome, SeriesOutcome::Prepared));
    }

    #[test]
    fn strict_run_aborts_on_first_failure() {
        let tmp = TempDir::new().unwrap();
        let mut policy = policy(tmp.path());
        policy.strict = true;
        let catalog = catalog_with(
            tmp.path(),
            "[[release]]\nseries = \"5.15\"\nversion = \"5.15.166\"\n",
        );
        let series = vec![Series::new("4.19").unwrap(), Series::new("5.15").unwrap()];

        let runner = ScriptedRunner::new();
        let err = run(&runner, &FailFastDecider, &policy, &catalog, &series)
            .unwrap_err()
            .to_string();
        assert!(err.contains("provisioning series 4.19"), "got: {err}");
        // Nothing ran for 5.15.
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_archive_reports_skip_and_fails_the_run_status() {
        let tmp = TempDir::new().unwrap();
        let policy = policy(tmp.path());
        let catalog = catalog_with(
            tmp.path(),
            "[[release]]\nseries = \"6.6\"\nversion = \"6.6.63\"\n",
        );
        let series = vec![Series::new("6.6").unwrap()];

        let runner = ScriptedRunner::new();
        runner.on("curl", &["-sfIL"], vec![fail(22, "404")]);

        let summary = run(&runner, &FailFastDecider, &policy, &catalog, &series).unwrap();
        assert!(matches!(
            summary.reports[0].outcome,
            SeriesOutcome::SkippedMissingArchive { .. }
        ));
        assert!(!summary.fully_successful());
    }
}
