//! One target host for one execution.
//!
//! A `HostRunner` knows its execution id, its exec dir on the target and the
//! conduit that reaches it. Every fleet operation is one method here.

use serde::Serialize;
use std::path::Path;

use crate::conduit::Conduit;
use crate::error::{Error, Result};
use crate::execution::{ExecDir, ExecutionId, Status, CONFIG_DIR};
use crate::utils::shell;

/// Printed in place of the log when a host never wrote one.
pub const NO_LOG_SENTINEL: &str = "(no exec.log found)";

/// The host literal that selects local mode.
pub const LOCAL_HOST: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl HostDescriptor {
    pub fn local() -> Self {
        Self {
            host: LOCAL_HOST.to_string(),
            port: 0,
            username: String::new(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.host == LOCAL_HOST
    }
}

/// What the runner is told besides the config dir.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_module: Option<String>,
    pub verbose: bool,
}

pub struct HostRunner {
    execution_id: ExecutionId,
    exec_dir: ExecDir,
    host: HostDescriptor,
    conduit: Box<dyn Conduit>,
}

impl HostRunner {
    pub fn new(
        execution_id: ExecutionId,
        exec_dir: ExecDir,
        host: HostDescriptor,
        conduit: Box<dyn Conduit>,
    ) -> Self {
        Self {
            execution_id,
            exec_dir,
            host,
            conduit,
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn exec_dir(&self) -> &ExecDir {
        &self.exec_dir
    }

    pub fn host(&self) -> &HostDescriptor {
        &self.host
    }

    /// Label used in output, e.g. `web1` or `local`.
    pub fn label(&self) -> &str {
        &self.host.host
    }

    /// Create the exec dir and copy both artifacts into it.
    pub fn transfer(&mut self, archive: &Path, executable: &Path) -> Result<()> {
        self.conduit
            .exec_command(&format!("mkdir -p {}", shell::quote_path(self.exec_dir.as_str())))?;
        self.conduit
            .transfer(archive, executable, self.exec_dir.as_str())?;
        log::debug!(
            "transferred artifacts to {}:{}",
            self.conduit.describe(),
            self.exec_dir
        );
        Ok(())
    }

    /// Start the runner detached from the session. Returns once the remote
    /// shell has forked; the STATUS file reports how it goes.
    pub fn execute(&mut self, archive: &Path, executable: &Path, opts: &RunOptions) -> Result<()> {
        let invocation = runner_invocation(archive, executable, opts, false)?;
        let cmd = format!(
            "cd {} && nohup sh -c {} >/dev/null 2>&1 &",
            shell::quote_path(self.exec_dir.as_str()),
            shell::escape_command_for_shell(&invocation)
        );
        self.conduit.exec_command(&cmd)?;
        log_status!("exec", "Started {} on {}", self.execution_id, self.label());
        Ok(())
    }

    /// Run both runner phases attached with `--dry-run` and return what the
    /// runner printed. Leaves no STATUS behind.
    pub fn dry_run(
        &mut self,
        archive: &Path,
        executable: &Path,
        opts: &RunOptions,
    ) -> Result<Vec<String>> {
        let invocation = runner_invocation(archive, executable, opts, true)?;
        let cmd = format!(
            "cd {} && {}",
            shell::quote_path(self.exec_dir.as_str()),
            invocation
        );
        let output = self.conduit.exec_command(&cmd)?;
        Ok(output.lines().map(str::to_string).collect())
    }

    pub fn status(&mut self) -> Result<Status> {
        let path = shell::quote_path(&self.exec_dir.status_file());
        let output = self
            .conduit
            .exec_command(&format!("if [ -f {p} ]; then cat {p}; fi", p = path))?;
        Ok(Status::parse(&output))
    }

    pub fn log(&mut self) -> Result<String> {
        let path = shell::quote_path(&self.exec_dir.log_file());
        self.conduit.exec_command(&format!(
            "if [ -f {p} ]; then cat {p}; else echo {sentinel}; fi",
            p = path,
            sentinel = shell::quote_arg(NO_LOG_SENTINEL)
        ))
    }

    /// Remove the exec dir. Refuses, without touching the host, when the exec
    /// dir is empty or a root path.
    pub fn clean(&mut self) -> Result<()> {
        self.exec_dir.ensure_safe_for_removal()?;
        self.conduit
            .exec_command(&format!("rm -rf {}", shell::quote_path(self.exec_dir.as_str())))?;
        Ok(())
    }
}

fn file_name(path: &Path, field: &str) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                field,
                "Path must end in a file name",
                Some(path.display().to_string()),
                None,
            )
        })
}

/// `./cattle-run init <archive> && ./cattle-run exec config [...]`, relative to
/// the exec dir.
fn runner_invocation(
    archive: &Path,
    executable: &Path,
    opts: &RunOptions,
    dry_run: bool,
) -> Result<String> {
    let runner = format!("./{}", file_name(executable, "executable")?);
    let archive = file_name(archive, "archive")?;

    let mut exec_args = vec![runner.clone(), "exec".to_string(), CONFIG_DIR.to_string()];
    if let Some(module) = &opts.config_module {
        exec_args.push("--config-module".to_string());
        exec_args.push(module.clone());
    }
    if dry_run {
        exec_args.push("--dry-run".to_string());
    }
    if opts.verbose {
        exec_args.push("--verbose".to_string());
    }

    Ok(format!(
        "{} && {}",
        shell::quote_args(&[runner, "init".to_string(), archive]),
        shell::quote_args(&exec_args)
    ))
}
