//! Execution identity and the on-host status protocol.
//!
//! One `ExecutionId` names a run across every participating host. On each host
//! the run lives under `<run_root>/<execution_id>/`:
//!
//! ```text
//! config/               extracted configuration package
//! cattle-run            runtime executable
//! cattle-config.tar.gz  archive as transferred
//! STATUS                PROGRESS | ERROR | DONE
//! exec.log              append-only diagnostic log
//! ```

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::utils::io;

pub const STATUS_FILE: &str = "STATUS";
pub const LOG_FILE: &str = "exec.log";
pub const CONFIG_DIR: &str = "config";
pub const ARCHIVE_NAME: &str = "cattle-config.tar.gz";
pub const RUNNER_NAME: &str = "cattle-run";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Mint a fresh id: UTC timestamp plus a random suffix.
    pub fn mint() -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", stamp, &suffix[..8]))
    }

    /// Accept a caller-supplied id. It becomes a path component on every host,
    /// so anything that could escape the run root is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern =
            PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid id pattern"));

        let raw = raw.trim();
        if raw.is_empty() || raw == "." || raw == ".." || !pattern.is_match(raw) {
            return Err(Error::validation_invalid_argument(
                "execution_id",
                "Execution id must be a single path component of [A-Za-z0-9._-]",
                Some(raw.to_string()),
                None,
            ));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `<run_root>/<execution_id>` on a target host, kept as a string because it
/// names a path on a machine that may not be this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExecDir(String);

impl ExecDir {
    pub fn new(run_root: &str, execution_id: &str) -> Self {
        let root = run_root.trim_end_matches('/');
        let path = match (root, execution_id) {
            ("", "") => run_root.to_string(),
            (root, "") => root.to_string(),
            (root, id) => format!("{}/{}", root, id),
        };
        Self(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, name: &str) -> String {
        format!("{}/{}", self.0.trim_end_matches('/'), name)
    }

    pub fn status_file(&self) -> String {
        self.join(STATUS_FILE)
    }

    pub fn log_file(&self) -> String {
        self.join(LOG_FILE)
    }

    /// The only guard in front of `rm -rf`.
    pub fn ensure_safe_for_removal(&self) -> Result<()> {
        ensure_safe_for_removal(&self.0)
    }
}

impl fmt::Display for ExecDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn ensure_safe_for_removal(path: &str) -> Result<()> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(Error::validation_unsafe_path(path, "exec dir is empty"));
    }
    if trimmed.chars().all(|c| c == '/') {
        return Err(Error::validation_unsafe_path(path, "exec dir is a root path"));
    }
    if matches!(trimmed.trim_end_matches('/'), "." | "..") {
        return Err(Error::validation_unsafe_path(
            path,
            "exec dir is a relative parent",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Progress,
    Error,
    Done,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Progress => "PROGRESS",
            Status::Error => "ERROR",
            Status::Done => "DONE",
            Status::Unknown => "UNKNOWN",
        }
    }

    /// Anything that isn't one of the three persisted values reads as UNKNOWN.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "PROGRESS" => Status::Progress,
            "ERROR" => Status::Error,
            "DONE" => Status::Done,
            _ => Status::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Error | Status::Done)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The STATUS file as seen by the runner that owns it.
///
/// Enforces `PROGRESS -> {DONE, ERROR}`: once terminal, every further write is
/// rejected. The starting state is whatever the file already says, so a second
/// runner in the same exec dir can't start over.
#[derive(Debug)]
pub struct StatusFile {
    path: PathBuf,
    current: Status,
}

impl StatusFile {
    pub fn new(exec_dir: &Path) -> Self {
        Self {
            path: exec_dir.join(STATUS_FILE),
            current: read_status(exec_dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Status {
        self.current
    }

    pub fn transition(&mut self, next: Status) -> Result<()> {
        let allowed = matches!(
            (self.current, next),
            (Status::Unknown, Status::Progress)
                | (Status::Progress, Status::Done)
                | (Status::Progress, Status::Error)
        );
        if next == Status::Progress && self.current != Status::Unknown {
            return Err(Error::validation_invalid_argument(
                "exec_dir",
                format!(
                    "execution already started here (STATUS is {})",
                    self.current
                ),
                Some(self.path.display().to_string()),
                None,
            ));
        }
        if !allowed {
            return Err(Error::internal_unexpected(format!(
                "illegal status transition {} -> {}",
                self.current, next
            )));
        }

        io::write_file_atomic(&self.path, next.as_str(), "write STATUS")?;
        self.current = next;
        Ok(())
    }
}

/// Read a STATUS file from the local filesystem.
pub fn read_status(exec_dir: &Path) -> Status {
    std::fs::read_to_string(exec_dir.join(STATUS_FILE))
        .map(|content| Status::parse(&content))
        .unwrap_or(Status::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_valid_and_distinct() {
        let a = ExecutionId::mint();
        let b = ExecutionId::mint();
        assert_ne!(a, b);
        assert!(ExecutionId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn parse_rejects_path_escapes() {
        for bad in ["", "  ", ".", "..", "a/b", "../etc", "id with space"] {
            assert!(ExecutionId::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn exec_dir_joins_run_root_and_id() {
        assert_eq!(ExecDir::new("/tmp/cattle", "abc").as_str(), "/tmp/cattle/abc");
        assert_eq!(ExecDir::new("/tmp/cattle/", "abc").as_str(), "/tmp/cattle/abc");
        assert_eq!(ExecDir::new("/", "abc").as_str(), "/abc");
        assert_eq!(
            ExecDir::new("/tmp/cattle", "abc").status_file(),
            "/tmp/cattle/abc/STATUS"
        );
    }

    #[test]
    fn root_and_empty_exec_dirs_are_unsafe() {
        assert!(ExecDir::new("/", "").ensure_safe_for_removal().is_err());
        assert!(ExecDir::new("", "").ensure_safe_for_removal().is_err());
        assert!(ensure_safe_for_removal("//").is_err());
        assert!(ensure_safe_for_removal("..").is_err());
        assert!(ensure_safe_for_removal("/tmp/cattle/abc").is_ok());
    }

    #[test]
    fn status_parse_falls_back_to_unknown() {
        assert_eq!(Status::parse("DONE\n"), Status::Done);
        assert_eq!(Status::parse("PROGRESS"), Status::Progress);
        assert_eq!(Status::parse(""), Status::Unknown);
        assert_eq!(Status::parse("garbage"), Status::Unknown);
    }

    #[test]
    fn status_file_only_moves_forward() {
        let dir = tempfile::tempdir().unwrap();
        let mut status = StatusFile::new(dir.path());

        assert_eq!(read_status(dir.path()), Status::Unknown);
        status.transition(Status::Progress).unwrap();
        assert_eq!(read_status(dir.path()), Status::Progress);
        status.transition(Status::Done).unwrap();
        assert_eq!(read_status(dir.path()), Status::Done);

        assert!(status.transition(Status::Progress).is_err());
        assert!(status.transition(Status::Error).is_err());
        assert_eq!(read_status(dir.path()), Status::Done);
    }

    #[test]
    fn status_file_starts_from_what_is_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = StatusFile::new(dir.path());
        first.transition(Status::Progress).unwrap();
        first.transition(Status::Error).unwrap();

        let mut second = StatusFile::new(dir.path());
        assert_eq!(second.current(), Status::Error);
        let err = second.transition(Status::Progress).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert_eq!(read_status(dir.path()), Status::Error);
    }

    #[test]
    fn status_file_cannot_skip_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut status = StatusFile::new(dir.path());
        assert!(status.transition(Status::Done).is_err());
        assert_eq!(read_status(dir.path()), Status::Unknown);
    }
}
