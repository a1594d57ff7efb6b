use clap::Args;
use serde::Serialize;

use cattle::defaults;
use cattle::execution::{ExecutionId, Status};
use cattle::fleet;

use super::{build_runners, CmdResult, HostArgs};

#[derive(Args)]
pub struct StatusArgs {
    /// Execution id printed by `cattle exec`
    pub execution_id: String,

    #[command(flatten)]
    pub target: HostArgs,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutput {
    pub command: &'static str,
    pub execution_id: String,
    pub hosts: Vec<HostStatus>,
}

#[derive(Debug, Serialize)]
pub struct HostStatus {
    pub host: String,
    pub status: Status,
}

pub fn run(args: StatusArgs) -> CmdResult<StatusOutput> {
    let defaults = defaults::load_defaults();
    let execution_id = ExecutionId::parse(&args.execution_id)?;
    let mut runners = build_runners(&args.target, &execution_id, &defaults)?;

    let statuses = fleet::map(
        &mut runners,
        defaults.max_workers,
        args.target.policy(),
        |r| r.status(),
    )?
    .into_result()?;

    let hosts = statuses
        .into_iter()
        .map(|(host, status)| HostStatus { host, status })
        .collect();

    Ok((
        StatusOutput {
            command: "status",
            execution_id: execution_id.to_string(),
            hosts,
        },
        0,
    ))
}
