use clap::Args;
use serde::Serialize;

use cattle::defaults;
use cattle::execution::ExecutionId;
use cattle::fleet;

use super::{build_runners, CmdResult, HostArgs};

#[derive(Args)]
pub struct CleanArgs {
    /// Execution id whose exec dir should be removed
    pub execution_id: String,

    #[command(flatten)]
    pub target: HostArgs,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanOutput {
    pub command: &'static str,
    pub execution_id: String,
    pub removed: Vec<CleanedHost>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanedHost {
    pub host: String,
    pub exec_dir: String,
}

pub fn run(args: CleanArgs) -> CmdResult<CleanOutput> {
    let defaults = defaults::load_defaults();
    let execution_id = ExecutionId::parse(&args.execution_id)?;
    let mut runners = build_runners(&args.target, &execution_id, &defaults)?;

    let removed = fleet::map(
        &mut runners,
        defaults.max_workers,
        args.target.policy(),
        |r| {
            r.clean()?;
            Ok(r.exec_dir().to_string())
        },
    )?
    .into_result()?
    .into_iter()
    .map(|(host, exec_dir)| CleanedHost { host, exec_dir })
    .collect();

    Ok((
        CleanOutput {
            command: "clean",
            execution_id: execution_id.to_string(),
            removed,
        },
        0,
    ))
}
