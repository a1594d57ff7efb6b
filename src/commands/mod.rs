use clap::Args;

use cattle::conduit::{Conduit, HostKeyPolicy, LocalConduit, RemoteConduit, RemoteOptions};
use cattle::credentials::CredentialSource;
use cattle::defaults::Defaults;
use cattle::execution::{ExecDir, ExecutionId};
use cattle::fleet::FanOutPolicy;
use cattle::host::{HostDescriptor, HostRunner, LOCAL_HOST};
use cattle::validation;

pub type CmdResult<T> = cattle::Result<(T, i32)>;

pub mod clean;
pub mod exec;
pub mod logs;
pub mod status;

/// Which hosts a command fans out to, and how.
#[derive(Args, Debug, Clone, Default)]
pub struct HostArgs {
    /// Run on this machine instead of over ssh
    #[arg(long, conflicts_with = "hosts")]
    pub local: bool,

    /// Target host, `host` or `user@host` (repeatable; `local` means this machine)
    #[arg(long = "host", value_name = "HOST")]
    pub hosts: Vec<String>,

    /// SSH port
    #[arg(long)]
    pub port: Option<u16>,

    /// SSH username for hosts given without `user@`
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    /// Directory holding one exec dir per execution on each host
    #[arg(long)]
    pub run_root: Option<String>,

    /// Refuse hosts missing from known_hosts
    #[arg(long)]
    pub strict_host_keys: bool,

    /// Skip hosts that haven't started once one host fails
    #[arg(long)]
    pub fail_fast: bool,
}

impl HostArgs {
    pub fn policy(&self) -> FanOutPolicy {
        if self.fail_fast {
            FanOutPolicy::FailFast
        } else {
            FanOutPolicy::BestEffort
        }
    }

    fn targets(&self) -> cattle::Result<Vec<String>> {
        if self.local {
            return Ok(vec![LOCAL_HOST.to_string()]);
        }
        validation::require_non_empty_vec(&self.hosts, "host").map_err(|e| {
            e.with_hint("Pass --local or one or more --host flags")
        })?;

        self.hosts
            .iter()
            .map(|host| {
                validation::require_non_empty(host, "host", "Host must not be empty")
                    .map(str::to_string)
            })
            .collect()
    }
}

/// One runner per target host, all sharing `execution_id`.
pub fn build_runners(
    args: &HostArgs,
    execution_id: &ExecutionId,
    defaults: &Defaults,
) -> cattle::Result<Vec<HostRunner>> {
    let targets = args.targets()?;
    let run_root = args.run_root.clone().unwrap_or_else(|| defaults.run_root.clone());
    let port = args.port.unwrap_or(defaults.ssh.default_port);
    let policy = if args.strict_host_keys {
        HostKeyPolicy::Strict
    } else {
        HostKeyPolicy::AcceptNew
    };

    let hosts = resolve_hosts(args, targets, port, defaults)?;

    // Resolved once, and only when some target is remote.
    let password = if hosts.iter().any(|h| !h.is_local()) {
        Some(CredentialSource::from_env_or_prompt(&defaults.password_env).resolve()?)
    } else {
        None
    };

    Ok(hosts
        .into_iter()
        .map(|host| {
            if host.is_local() {
                let root = shellexpand::tilde(&run_root).to_string();
                let conduit: Box<dyn Conduit> = Box::new(LocalConduit::new());
                return HostRunner::new(
                    execution_id.clone(),
                    ExecDir::new(&root, execution_id.as_str()),
                    host,
                    conduit,
                );
            }

            let conduit = RemoteConduit::new(RemoteOptions {
                host: host.host.clone(),
                port: host.port,
                username: host.username.clone(),
                password: password.clone(),
                host_key_policy: policy,
                connect_timeout_secs: defaults.ssh.connect_timeout_secs,
                scp_flags: defaults.ssh.scp_flags.clone(),
            });

            HostRunner::new(
                execution_id.clone(),
                ExecDir::new(&run_root, execution_id.as_str()),
                host,
                Box::new(conduit),
            )
        })
        .collect())
}

/// Resolve `host` / `user@host` targets and drop repeats of the same machine.
///
/// Every target shares one exec dir path, so two usernames on one host would
/// run the same execution twice in the same directory.
fn resolve_hosts(
    args: &HostArgs,
    targets: Vec<String>,
    port: u16,
    defaults: &Defaults,
) -> cattle::Result<Vec<HostDescriptor>> {
    let mut hosts: Vec<HostDescriptor> = Vec::new();

    for target in targets {
        let descriptor = if target == LOCAL_HOST {
            HostDescriptor::local()
        } else {
            let (user, host) = match target.split_once('@') {
                Some((user, host)) => (Some(user.to_string()), host.to_string()),
                None => (None, target.clone()),
            };
            let username = validation::require(
                user.or_else(|| args.username.clone())
                    .or_else(|| defaults.ssh.default_username.clone()),
                "username",
            )?;
            HostDescriptor {
                host,
                port,
                username,
            }
        };

        match hosts
            .iter()
            .find(|h| h.host == descriptor.host && h.port == descriptor.port)
        {
            Some(existing) if existing.username == descriptor.username => {
                log::debug!("ignoring repeated target {}", target);
            }
            Some(existing) => {
                return Err(cattle::Error::validation_invalid_argument(
                    "host",
                    format!(
                        "{} is targeted as both {}@{} and {}@{}",
                        descriptor.host,
                        existing.username,
                        existing.host,
                        descriptor.username,
                        descriptor.host
                    ),
                    Some(target),
                    None,
                ))
            }
            None => hosts.push(descriptor),
        }
    }

    Ok(hosts)
}

macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args))
    };
}

pub(crate) fn run_json(command: crate::Commands) -> (cattle::Result<serde_json::Value>, i32) {
    crate::tty::status("cattle is working...");

    match command {
        crate::Commands::Exec(args) => dispatch!(args, exec),
        crate::Commands::Status(args) => dispatch!(args, status),
        crate::Commands::Clean(args) => dispatch!(args, clean),

        // Log prints raw text as hosts finish
        crate::Commands::Log(_) => {
            let err = cattle::Error::validation_invalid_argument(
                "output_mode",
                "Log command uses raw output mode",
                None,
                None,
            );
            crate::output::map_cmd_result_to_json::<serde_json::Value>(Err(err))
        }
    }
}

pub(crate) fn run_raw(command: crate::Commands) -> cattle::Result<i32> {
    match command {
        crate::Commands::Log(args) => logs::run(args),
        _ => Err(cattle::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support raw output",
            None,
            None,
        )),
    }
}
