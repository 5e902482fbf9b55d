use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{bail, Result};
use ktree_builder::catalog::Catalog;
use ktree_builder::mirror;
use ktree_builder::plan;
use ktree_builder::policy::{Architecture, ForceFlags, LatestMode, MismatchPolicy, Policy};
use ktree_builder::preflight;
use ktree_builder::process::HostRunner;
use ktree_builder::provision;
use ktree_builder::resolver::{UpstreamResolver, DEFAULT_INDEX_URL};
use ktree_builder::toolchain::{
    FailFastDecider, FixedDecider, MismatchChoice, MismatchDecider, PromptDecider,
};
use ktree_builder::version::Series;

const DEFAULT_BASE_DIR: &str = "kernels";
const DEFAULT_LOCK_FILE: &str = "kernel-versions.toml";

fn usage() -> &'static str {
    "Usage:\n  ktree-builder [options] [series ...]\n\n\
     Provisions prepared kernel build trees for each series pinned in the\n\
     release lock document (default: every pinned series).\n\n\
     Options:\n  \
     -a, --arch <arch>            target architecture (default: $ARCH or x86_64)\n  \
     -c, --cross-compile <pfx>    cross toolchain prefix (default: $CROSS_COMPILE)\n  \
     -b, --base-url <url>         mirror base URL\n      \
     --index-url <url>        upstream release index URL\n  \
     -d, --base-dir <dir>         directory the trees live under (default: kernels)\n      \
     --lock <file>             release lock document (default: kernel-versions.toml)\n  \
     -C, --config-dir <dir>       external .config import directory\n  \
     -s, --strict                 any missing or corrupt artifact is fatal\n  \
     -f, --force                  redo every stage\n      \
     --force-download          redo the fetch stage\n      \
     --force-extract           redo the extract stage\n      \
     --force-prepare           redo the prepare stage\n  \
     -l, --latest                 prefer the newest upstream version per series\n  \
     -L, --latest-on-broken       fall back to newest only when the pinned archive is gone\n      \
     --on-mismatch <policy>    rebuild, keep or ask (default: ask)\n      \
     --per-toolchain           nest build dirs under a compiler id\n  \
     -n, --dry-run                print the plan; change nothing\n  \
     -t, --table                  print the series/version/URL table; no provisioning\n  \
     -h, --help                   this text"
}

struct Invocation {
    policy: Policy,
    series: Vec<String>,
    dry_run: bool,
    table: bool,
}

fn parse_args(args: &[String]) -> Result<Option<Invocation>> {
    let mut arch = std::env::var("ARCH").ok();
    let mut cross_compile = std::env::var("CROSS_COMPILE").unwrap_or_default();
    let mut mirror_base = mirror::DEFAULT_MIRROR_BASE.to_string();
    let mut index_url = DEFAULT_INDEX_URL.to_string();
    let mut base_dir = PathBuf::from(DEFAULT_BASE_DIR);
    let mut lock_file = PathBuf::from(DEFAULT_LOCK_FILE);
    let mut config_dir: Option<PathBuf> = None;
    let mut strict = false;
    let mut force = ForceFlags::default();
    let mut latest = LatestMode::Pinned;
    let mut mismatch = MismatchPolicy::Ask;
    let mut per_toolchain_dirs = false;
    let mut dry_run = false;
    let mut table = false;
    let mut series = Vec::new();

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| -> Result<String> {
            it.next()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("{} requires a value\n{}", flag, usage()))
        };
        match arg.as_str() {
            "-a" | "--arch" => arch = Some(value(arg)?),
            "-c" | "--cross-compile" => cross_compile = value(arg)?,
            "-b" | "--base-url" => mirror_base = value(arg)?.trim_end_matches('/').to_string(),
            "--index-url" => index_url = value(arg)?,
            "-d" | "--base-dir" => base_dir = PathBuf::from(value(arg)?),
            "--lock" => lock_file = PathBuf::from(value(arg)?),
            "-C" | "--config-dir" => config_dir = Some(PathBuf::from(value(arg)?)),
            "-s" | "--strict" => strict = true,
            "-f" | "--force" => force = ForceFlags::all(),
            "--force-download" => force.download = true,
            "--force-extract" => force.extract = true,
            "--force-prepare" => force.prepare = true,
            "-l" | "--latest" => latest = LatestMode::LatestAll,
            "-L" | "--latest-on-broken" => latest = LatestMode::LatestOnBroken,
            "--on-mismatch" => mismatch = MismatchPolicy::parse(&value(arg)?)?,
            "--per-toolchain" => per_toolchain_dirs = true,
            "-n" | "--dry-run" => dry_run = true,
            "-t" | "--table" => table = true,
            "-h" | "--help" => {
                println!("{}", usage());
                return Ok(None);
            }
            other if other.starts_with('-') => {
                bail!("unknown option '{}'\n{}", other, usage())
            }
            positional => series.push(positional.to_string()),
        }
    }

    let arch = Architecture::parse(arch.as_deref().unwrap_or("x86_64"))?;
    Ok(Some(Invocation {
        policy: Policy {
            arch,
            cross_compile,
            mirror_base,
            index_url,
            base_dir,
            lock_file,
            config_dir,
            strict,
            force,
            latest,
            mismatch,
            per_toolchain_dirs,
        },
        series,
        dry_run,
        table,
    }))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(inv) = parse_args(&args)? else {
        return Ok(());
    };

    let catalog = Catalog::load(&inv.policy.lock_file)?;

    let series = if inv.series.is_empty() {
        catalog.series()
    } else {
        inv.series
            .iter()
            .map(|s| Series::new(s))
            .collect::<Result<Vec<_>>>()?
    };
    if series.is_empty() {
        bail!(
            "no series requested and none pinned in '{}'",
            inv.policy.lock_file.display()
        );
    }

    if inv.table {
        return print_table(&inv.policy, &catalog, &series);
    }

    preflight::check_host_tools(&inv.policy)?;

    let runner = HostRunner;
    if inv.dry_run {
        return print_plan(&runner, &inv.policy, &catalog, &series);
    }

    let decider = make_decider(inv.policy.mismatch);
    let summary = provision::run(&runner, decider.as_ref(), &inv.policy, &catalog, &series)?;

    for report in &summary.reports {
        let status = match report.outcome {
            provision::SeriesOutcome::Prepared => "prepared",
            provision::SeriesOutcome::Reused => "reused",
            provision::SeriesOutcome::KeptOnMismatch => "kept (toolchain mismatch)",
            provision::SeriesOutcome::SkippedMissingArchive { .. } => "skipped (missing archive)",
        };
        println!("[ktree:{}] {} {}", report.series, report.version, status);
    }
    for (series, err) in &summary.failures {
        println!("[ktree:{}] failed: {:#}", series, err);
    }

    if !summary.fully_successful() {
        let total = summary.reports.len() + summary.failures.len();
        let bad = total
            - summary
                .reports
                .iter()
                .filter(|r| r.provisioned() || matches!(r.outcome, provision::SeriesOutcome::KeptOnMismatch))
                .count();
        bail!("{} of {} series failed", bad, total);
    }
    Ok(())
}

fn make_decider(policy: MismatchPolicy) -> Box<dyn MismatchDecider> {
    match policy {
        MismatchPolicy::Rebuild => Box::new(FixedDecider(MismatchChoice::Rebuild)),
        MismatchPolicy::Keep => Box::new(FixedDecider(MismatchChoice::Keep)),
        MismatchPolicy::Ask => {
            if std::io::stdin().is_terminal() {
                Box::new(PromptDecider)
            } else {
                Box::new(FailFastDecider)
            }
        }
    }
}

/// Reference print: series, pinned version, archive URL. No provisioning,
/// no network, no preflight.
fn print_table(policy: &Policy, catalog: &Catalog, series: &[Series]) -> Result<()> {
    println!("{:<10} {:<14} URL", "SERIES", "VERSION");
    for s in series {
        let version = catalog.resolve(s)?;
        println!(
            "{:<10} {:<14} {}",
            s.to_string(),
            version.to_string(),
            mirror::archive_url(&policy.mirror_base, version)
        );
    }
    Ok(())
}

fn print_plan(
    runner: &HostRunner,
    policy: &Policy,
    catalog: &Catalog,
    series: &[Series],
) -> Result<()> {
    let resolver = UpstreamResolver::new(runner, policy);
    let mut failed = 0usize;
    for s in series {
        match plan::plan_series(runner, policy, catalog, &resolver, s) {
            Ok(entry) => println!("{}", entry.render()),
            Err(err) => {
                if policy.strict {
                    return Err(err.context(format!("planning series {}", s)));
                }
                eprintln!("[ktree:{}] planning failed: {:#}", s, err);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} series failed to plan", failed, series.len());
    }
    Ok(())
}
