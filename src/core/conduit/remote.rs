use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use super::Conduit;
use crate::error::{Error, Result, TargetDetails, TransferFailedDetails};
use crate::paths;
use crate::utils::command::CommandOutput;
use crate::utils::{io, shell};

/// How an unknown host key is treated when the master session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Record keys for new hosts; refuse changed keys.
    #[default]
    AcceptNew,
    /// Only connect to hosts already in known_hosts.
    Strict,
}

impl HostKeyPolicy {
    fn ssh_option(&self) -> &'static str {
        match self {
            HostKeyPolicy::AcceptNew => "StrictHostKeyChecking=accept-new",
            HostKeyPolicy::Strict => "StrictHostKeyChecking=yes",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub host_key_policy: HostKeyPolicy,
    pub connect_timeout_secs: u32,
    pub scp_flags: Vec<String>,
}

/// ssh/scp over one multiplexed OpenSSH master session.
///
/// The master is opened on first use and torn down on drop. Every command and
/// transfer after that rides the control socket, so authentication happens
/// once per host.
pub struct RemoteConduit {
    opts: RemoteOptions,
    control_path: PathBuf,
    master: Option<Child>,
}

impl RemoteConduit {
    pub fn new(opts: RemoteOptions) -> Self {
        let control_path = control_path_for(&opts.username, &opts.host, opts.port);
        Self {
            opts,
            control_path,
            master: None,
        }
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.opts.username, self.opts.host)
    }

    fn target(&self) -> TargetDetails {
        TargetDetails {
            host: Some(self.opts.host.clone()),
            user: Some(self.opts.username.clone()),
            port: Some(self.opts.port),
        }
    }

    fn control_option(&self) -> String {
        format!("ControlPath={}", self.control_path.display())
    }

    fn master_args(&self) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-N".to_string(),
            "-o".to_string(),
            self.control_option(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            self.opts.host_key_policy.ssh_option().to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.opts.connect_timeout_secs),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "-p".to_string(),
            self.opts.port.to_string(),
        ];

        if self.opts.password.is_some() {
            args.extend([
                "-o".to_string(),
                "PreferredAuthentications=password,keyboard-interactive".to_string(),
                "-o".to_string(),
                "PubkeyAuthentication=no".to_string(),
            ]);
        } else {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }

        args.push(self.destination());
        args
    }

    fn master_command(&self) -> Command {
        let mut cmd = match &self.opts.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd
            }
            None => Command::new("ssh"),
        };
        cmd.args(self.master_args());
        cmd
    }

    fn check_master(&self) -> bool {
        Command::new("ssh")
            .args(["-S", &self.control_path.to_string_lossy(), "-O", "check"])
            .arg(self.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Open the master session if it isn't up yet.
    fn connect(&mut self) -> Result<()> {
        if self.master.is_some() {
            return Ok(());
        }

        io::ensure_dir(&paths::control_sockets(), "create ssh control dir")?;
        log::debug!("opening ssh master session to {}", self.describe());

        let mut child = self
            .master_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ssh_connect_failed(self.target(), format!("failed to spawn ssh: {}", e)))?;

        let deadline =
            Instant::now() + Duration::from_secs(u64::from(self.opts.connect_timeout_secs) + 5);

        loop {
            match child.try_wait() {
                Ok(Some(_)) => {
                    let mut stderr = String::new();
                    if let Some(mut pipe) = child.stderr.take() {
                        let _ = pipe.read_to_string(&mut stderr);
                    }
                    return Err(Error::ssh_connect_failed(self.target(), stderr));
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(Error::ssh_connect_failed(self.target(), e.to_string()));
                }
            }

            if self.check_master() {
                break;
            }

            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::ssh_connect_failed(
                    self.target(),
                    "timed out waiting for ssh master session",
                ));
            }

            std::thread::sleep(Duration::from_millis(100));
        }

        log_status!("ssh", "Connected to {}", self.describe());
        self.master = Some(child);
        Ok(())
    }

    fn scp_args(&self, archive: &Path, executable: &Path, dest_dir: &str) -> Vec<String> {
        let mut args = self.opts.scp_flags.clone();
        args.extend([
            "-o".to_string(),
            self.control_option(),
            "-P".to_string(),
            self.opts.port.to_string(),
            archive.to_string_lossy().to_string(),
            executable.to_string_lossy().to_string(),
            format!("{}:{}/", self.destination(), shell::quote_path(dest_dir)),
        ]);
        args
    }
}

impl Conduit for RemoteConduit {
    fn transfer(&mut self, archive: &Path, executable: &Path, dest_dir: &str) -> Result<()> {
        self.connect()?;

        let args = self.scp_args(archive, executable, dest_dir);
        log_status!(
            "transfer",
            "Uploading {} and {} -> {}:{}",
            archive.display(),
            executable.display(),
            self.describe(),
            dest_dir
        );

        let output = match Command::new("scp").args(&args).output() {
            Ok(out) => CommandOutput::from_output(&out),
            Err(e) => CommandOutput::spawn_failed("failed to run scp", e),
        };

        if output.success {
            return Ok(());
        }

        Err(Error::transfer_failed(TransferFailedDetails {
            source: format!("{}, {}", archive.display(), executable.display()),
            destination: format!("{}:{}", self.describe(), dest_dir),
            exit_code: output.exit_code,
            stderr: output.stderr,
        }))
    }

    fn exec_command(&mut self, cmd: &str) -> Result<String> {
        self.connect()?;
        log::debug!("[{}] {}", self.describe(), cmd);

        let output = Command::new("ssh")
            .args(["-S", &self.control_path.to_string_lossy()])
            .args(["-p", &self.opts.port.to_string()])
            .args(["-o", "BatchMode=yes"])
            .arg(self.destination())
            .arg(cmd)
            .stdin(Stdio::null())
            .output();

        let output = match output {
            Ok(out) => CommandOutput::from_output(&out),
            Err(e) => CommandOutput::spawn_failed("failed to run ssh", e),
        };

        output.into_result(cmd, self.target())
    }

    fn describe(&self) -> String {
        format!("{}@{}:{}", self.opts.username, self.opts.host, self.opts.port)
    }
}

impl Drop for RemoteConduit {
    fn drop(&mut self) {
        let Some(mut child) = self.master.take() else {
            return;
        };

        let _ = Command::new("ssh")
            .args(["-S", &self.control_path.to_string_lossy(), "-O", "exit"])
            .arg(self.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Control socket path for one destination. Hashed to stay under the
/// unix socket path limit; the pid keeps concurrent CLI runs apart.
fn control_path_for(username: &str, host: &str, port: u16) -> PathBuf {
    let digest = Sha256::digest(format!("{}@{}:{}", username, host, port).as_bytes());
    let short: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    paths::control_sockets().join(format!("cm-{}-{}", std::process::id(), short))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(password: Option<&str>) -> RemoteOptions {
        RemoteOptions {
            host: "web1".to_string(),
            port: 2222,
            username: "deploy".to_string(),
            password: password.map(str::to_string),
            host_key_policy: HostKeyPolicy::AcceptNew,
            connect_timeout_secs: 10,
            scp_flags: vec!["-q".to_string(), "-p".to_string()],
        }
    }

    #[test]
    fn describe_includes_user_host_and_port() {
        assert_eq!(RemoteConduit::new(options(None)).describe(), "deploy@web1:2222");
    }

    #[test]
    fn control_path_is_stable_per_destination() {
        let a = RemoteConduit::new(options(None));
        let b = RemoteConduit::new(options(Some("pw")));
        assert_eq!(a.control_path(), b.control_path());
        assert!(a.control_path().starts_with(paths::control_sockets()));

        let mut other = options(None);
        other.host = "web2".to_string();
        assert_ne!(a.control_path(), RemoteConduit::new(other).control_path());
    }

    #[test]
    fn master_args_follow_host_key_policy() {
        let mut opts = options(None);
        let args = RemoteConduit::new(opts.clone()).master_args();
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));

        opts.host_key_policy = HostKeyPolicy::Strict;
        let args = RemoteConduit::new(opts).master_args();
        assert!(args.contains(&"StrictHostKeyChecking=yes".to_string()));
    }

    #[test]
    fn password_sessions_run_under_sshpass() {
        let conduit = RemoteConduit::new(options(Some("secret")));
        let cmd = conduit.master_command();
        assert_eq!(cmd.get_program(), "sshpass");

        let envs: Vec<_> = cmd.get_envs().collect();
        assert!(envs
            .iter()
            .any(|(k, v)| *k == "SSHPASS" && v.map(|v| v == "secret").unwrap_or(false)));
        assert!(!conduit.master_args().contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn scp_targets_quoted_dest_dir_over_control_socket() {
        let conduit = RemoteConduit::new(options(None));
        let args = conduit.scp_args(
            Path::new("/stage/cattle-config.tar.gz"),
            Path::new("/stage/cattle-run"),
            "/tmp/cattle/20260101T000000-abcd1234",
        );
        assert_eq!(&args[..2], &["-q".to_string(), "-p".to_string()]);
        assert!(args.contains(&conduit.control_option()));
        assert_eq!(
            args.last().unwrap(),
            "deploy@web1:'/tmp/cattle/20260101T000000-abcd1234'/"
        );
    }
}
