use std::path::Path;

use super::Conduit;
use crate::error::{Result, TargetDetails};
use crate::utils::{command, io};

/// Runs everything on this machine through `sh -c`.
#[derive(Debug, Default)]
pub struct LocalConduit;

impl LocalConduit {
    pub fn new() -> Self {
        Self
    }
}

impl Conduit for LocalConduit {
    fn transfer(&mut self, archive: &Path, executable: &Path, dest_dir: &str) -> Result<()> {
        let dest = Path::new(dest_dir);
        io::ensure_dir(dest, "create exec dir")?;
        io::copy_into(archive, dest)?;
        // fs::copy carries the permission bits, so the runner stays executable.
        io::copy_into(executable, dest)?;
        Ok(())
    }

    fn exec_command(&mut self, cmd: &str) -> Result<String> {
        log::debug!("[local] {}", cmd);
        command::capture_shell(cmd).into_result(cmd, TargetDetails::local())
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn exec_command_returns_trimmed_stdout() {
        let mut conduit = LocalConduit::new();
        assert_eq!(conduit.exec_command("printf ' hi \\n'").unwrap(), "hi");
    }

    #[test]
    fn exec_command_failure_is_remote_command_failed() {
        let mut conduit = LocalConduit::new();
        let err = conduit.exec_command("echo nope >&2; exit 7").unwrap_err();
        assert_eq!(err.code.as_str(), "remote.command_failed");
        assert_eq!(err.details["exitCode"], 7);
        assert_eq!(err.details["target"]["host"], "local");
    }

    #[test]
    fn transfer_creates_dest_and_keeps_executable_bit() {
        let src = tempfile::tempdir().unwrap();
        let archive = src.path().join("cattle-config.tar.gz");
        let runner = src.path().join("cattle-run");
        fs::write(&archive, b"archive").unwrap();
        fs::write(&runner, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&runner, fs::Permissions::from_mode(0o755)).unwrap();

        let dest_root = tempfile::tempdir().unwrap();
        let dest = dest_root.path().join("run").join("exec-1");
        let dest_str = dest.to_string_lossy().to_string();

        LocalConduit::new()
            .transfer(&archive, &runner, &dest_str)
            .unwrap();

        assert_eq!(fs::read(dest.join("cattle-config.tar.gz")).unwrap(), b"archive");
        let mode = fs::metadata(dest.join("cattle-run"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
