use clap::Args;

use cattle::defaults;
use cattle::execution::ExecutionId;
use cattle::fleet;

use super::{build_runners, HostArgs};

#[derive(Args)]
pub struct LogArgs {
    /// Execution id whose exec.log should be printed
    pub execution_id: String,

    #[command(flatten)]
    pub target: HostArgs,
}

/// Print each host's exec.log as one `==== host ====` block, in the order
/// hosts answer. Returns the exit code.
pub fn run(args: LogArgs) -> cattle::Result<i32> {
    let defaults = defaults::load_defaults();
    let execution_id = ExecutionId::parse(&args.execution_id)?;
    let mut runners = build_runners(&args.target, &execution_id, &defaults)?;

    fleet::map(
        &mut runners,
        defaults.max_workers,
        args.target.policy(),
        |r| {
            let text = r.log()?;
            fleet::with_console(|| {
                println!("==== {} ====", r.label());
                println!("{}", text);
            });
            Ok(())
        },
    )?
    .into_result()?;

    Ok(0)
}
