use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use cattle::config;
use cattle::defaults;
use cattle::execution::{ExecutionId, Status};
use cattle::facility::FacilityRegistry;
use cattle::fleet::{self, FanOutPolicy};
use cattle::host::{HostRunner, RunOptions};
use cattle::log_status;
use cattle::package::{self, Package};

use super::{build_runners, CmdResult, HostArgs};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Args)]
pub struct ExecArgs {
    /// Config directory holding the step manifest
    pub config_dir: PathBuf,

    #[command(flatten)]
    pub target: HostArgs,

    /// Step manifest inside the config directory
    #[arg(long, short = 'm')]
    pub config_module: Option<String>,

    /// Print what each step would do on every host without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Log the runner at debug level
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Poll until every host finishes
    #[arg(long)]
    pub wait: bool,

    /// Seconds to wait with --wait
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// cattle-run binary to ship (defaults to $CATTLE_RUNNER, then next to cattle)
    #[arg(long)]
    pub runner: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub command: &'static str,
    pub execution_id: String,
    pub config_module: String,
    pub dry_run: bool,
    pub archive_sha256: String,
    pub file_count: usize,
    pub hosts: Vec<HostExecResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostExecResult {
    pub host: String,
    pub exec_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn run(args: ExecArgs) -> CmdResult<ExecOutput> {
    let defaults = defaults::load_defaults();
    let config_module = args
        .config_module
        .clone()
        .unwrap_or_else(|| defaults.config_module.clone());

    // Nothing leaves this machine unless the config loads here first.
    let loaded = config::load(&args.config_dir, &config_module, &FacilityRegistry::builtin())?;
    log::debug!("validated {:?}", loaded);

    let runner = package::locate_runner(args.runner.as_deref())?;
    let execution_id = ExecutionId::mint();
    let mut runners = build_runners(&args.target, &execution_id, &defaults)?;

    let package = package::build(
        &args.config_dir,
        &runner,
        &execution_id,
        &defaults.package.excludes,
    )?;

    let opts = RunOptions {
        config_module: Some(config_module.clone()),
        verbose: args.verbose,
    };

    let result = ship(&args, &mut runners, &package, &opts, defaults.max_workers);
    package.cleanup();
    let (hosts, timed_out, exit_code) = result?;

    Ok((
        ExecOutput {
            command: "exec",
            execution_id: execution_id.to_string(),
            config_module,
            dry_run: args.dry_run,
            archive_sha256: package.archive_sha256.clone(),
            file_count: package.file_count,
            hosts,
            timed_out,
        },
        exit_code,
    ))
}

type ShipResult = (Vec<HostExecResult>, Option<bool>, i32);

fn ship(
    args: &ExecArgs,
    runners: &mut [HostRunner],
    package: &Package,
    opts: &RunOptions,
    max_workers: usize,
) -> cattle::Result<ShipResult> {
    let policy = args.target.policy();

    fleet::map(runners, max_workers, policy, |r| {
        r.transfer(&package.archive, &package.executable)
    })?
    .into_result()?;

    if args.dry_run {
        let lines = fleet::map(runners, max_workers, policy, |r| {
            let lines = r.dry_run(&package.archive, &package.executable, opts);
            // Clean up even when the runner refused the config.
            let cleaned = r.clean();
            let lines = lines?;
            cleaned?;
            Ok(lines)
        })?
        .into_result()?;

        let hosts = results_for(runners, |host| {
            let lines = lines
                .iter()
                .find(|(h, _)| h == host)
                .map(|(_, l)| l.clone());
            (None, lines, None)
        });
        return Ok((hosts, None, 0));
    }

    fleet::map(runners, max_workers, policy, |r| {
        r.execute(&package.archive, &package.executable, opts)
    })?
    .into_result()?;

    if !args.wait {
        // Best-effort snapshot: the runners were only just forked, and a host
        // that can't be read right now still started.
        return Ok((snapshot(runners, max_workers)?, None, 0));
    }

    // A timeout too large to represent means no deadline.
    let deadline = Instant::now().checked_add(Duration::from_secs(args.timeout));
    let (statuses, timed_out) = loop {
        let statuses = poll_statuses(runners, max_workers)?;
        if statuses
            .iter()
            .all(|(_, s)| matches!(s, Ok(status) if status.is_terminal()))
        {
            break (statuses, false);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log_status!("exec", "Timed out after {}s waiting for hosts", args.timeout);
            break (statuses, true);
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let failed = statuses
        .iter()
        .any(|(_, s)| !matches!(s, Ok(status) if *status != Status::Error));
    let exit_code = if failed || timed_out { 1 } else { 0 };
    let hosts = results_for(runners, |host| status_of(&statuses, host));
    Ok((hosts, Some(timed_out), exit_code))
}

type HostStatus = (String, cattle::Result<Status>);

/// One status read per host. A host that can't be reached keeps its error
/// instead of failing the whole poll.
fn poll_statuses(
    runners: &mut [HostRunner],
    max_workers: usize,
) -> cattle::Result<Vec<HostStatus>> {
    Ok(
        fleet::map(runners, max_workers, FanOutPolicy::BestEffort, |r| r.status())?
            .into_outcomes()
            .into_iter()
            .map(|outcome| (outcome.host, outcome.result))
            .collect(),
    )
}

fn snapshot(runners: &mut [HostRunner], max_workers: usize) -> cattle::Result<Vec<HostExecResult>> {
    let statuses = poll_statuses(runners, max_workers)?;
    Ok(results_for(runners, |host| status_of(&statuses, host)))
}

fn status_of(
    statuses: &[HostStatus],
    host: &str,
) -> (Option<Status>, Option<Vec<String>>, Option<String>) {
    match statuses.iter().find(|(h, _)| h == host).map(|(_, s)| s) {
        Some(Ok(status)) => (Some(*status), None, None),
        Some(Err(err)) => (None, None, Some(err.detail_text())),
        None => (None, None, None),
    }
}

/// Per-host results in the order hosts were given.
fn results_for<F>(runners: &[HostRunner], mut f: F) -> Vec<HostExecResult>
where
    F: FnMut(&str) -> (Option<Status>, Option<Vec<String>>, Option<String>),
{
    runners
        .iter()
        .map(|r| {
            let (status, dry_run, error) = f(r.label());
            HostExecResult {
                host: r.label().to_string(),
                exec_dir: r.exec_dir().to_string(),
                status,
                dry_run,
                error,
            }
        })
        .collect()
}
