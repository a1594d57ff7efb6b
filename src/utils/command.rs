//! Command execution primitives with consistent error handling.

use std::process::{Command, Output};

use crate::error::{Error, RemoteCommandFailedDetails, Result, TargetDetails};

/// Captured result of one process run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn from_output(out: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        }
    }

    pub fn spawn_failed(context: &str, err: std::io::Error) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("{}: {}", context, err),
            success: false,
            exit_code: -1,
        }
    }

    /// Convert into trimmed stdout, or a command failure carrying both streams.
    pub fn into_result(self, command: &str, target: TargetDetails) -> Result<String> {
        if self.success {
            return Ok(self.stdout.trim().to_string());
        }
        Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            target,
        }))
    }
}

/// Run a program with arguments (no shell) and capture its output.
pub fn capture(program: &str, args: &[&str]) -> CommandOutput {
    match Command::new(program).args(args).output() {
        Ok(out) => CommandOutput::from_output(&out),
        Err(e) => CommandOutput::spawn_failed(&format!("failed to run {}", program), e),
    }
}

/// Run a program and return trimmed stdout on success.
pub fn run(program: &str, args: &[&str]) -> Result<String> {
    let display = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    capture(program, args).into_result(&display, TargetDetails::local())
}

/// Run a `sh -c` command line and capture its output.
pub fn capture_shell(command: &str) -> CommandOutput {
    match Command::new("sh").args(["-c", command]).output() {
        Ok(out) => CommandOutput::from_output(&out),
        Err(e) => CommandOutput::spawn_failed("failed to spawn sh", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_trimmed_stdout() {
        assert_eq!(run("echo", &["  hello  "]).unwrap(), "hello");
    }

    #[test]
    fn failing_command_carries_exit_code_and_streams() {
        let err = capture_shell("echo out; echo err >&2; exit 3")
            .into_result("probe", TargetDetails::local())
            .unwrap_err();
        assert_eq!(err.code.as_str(), "remote.command_failed");
        assert_eq!(err.details["exitCode"], 3);
        assert_eq!(err.details["stdout"], "out\n");
        assert_eq!(err.details["stderr"], "err\n");
    }

    #[test]
    fn missing_program_is_exit_code_minus_one() {
        let out = capture("/nonexistent/cattle-probe", &[]);
        assert!(!out.success);
        assert_eq!(out.exit_code, -1);
    }
}
