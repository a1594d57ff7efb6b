//! Filesystem facilities.

use serde::Deserialize;
use serde_json::Value;
use std::ffi::CString;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::BuildContext;
use crate::error::{Error, Result};
use crate::step::Step;

fn io_error(e: std::io::Error, context: String) -> Error {
    Error::internal_io(e.to_string(), Some(context))
}

// ============================================================================
// Chmod
// ============================================================================

/// Accepts `438`, `"0o666"`, `"0666"` or `"666"`; strings are always octal.
#[derive(Deserialize)]
#[serde(untagged)]
enum ModeSpec {
    Number(u32),
    Text(String),
}

impl ModeSpec {
    fn resolve(self) -> std::result::Result<u32, String> {
        match self {
            ModeSpec::Number(n) => Ok(n),
            ModeSpec::Text(s) => {
                let digits = s.trim().trim_start_matches("0o");
                u32::from_str_radix(digits, 8).map_err(|_| format!("'{}' is not an octal mode", s))
            }
        }
    }
}

#[derive(Deserialize)]
struct ChmodParams {
    path: String,
    mode: ModeSpec,
}

pub struct Chmod {
    pub path: PathBuf,
    pub mode: u32,
}

pub(super) fn build_chmod(entry: &Value, ctx: &BuildContext) -> Result<Box<dyn Step>> {
    let params: ChmodParams = ctx.params(entry)?;
    let mode = params.mode.resolve().map_err(|problem| {
        Error::config_invalid_value(format!("{}.mode", ctx.key), None, problem)
    })?;
    Ok(Box::new(Chmod {
        path: PathBuf::from(params.path),
        mode,
    }))
}

impl Step for Chmod {
    fn name(&self) -> &str {
        "Chmod"
    }

    fn should_run(&self) -> bool {
        true
    }

    fn run(&mut self) -> Result<()> {
        fs::set_permissions(&self.path, fs::Permissions::from_mode(self.mode))
            .map_err(|e| io_error(e, format!("chmod {}", self.path.display())))
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!("chmod({}, 0o{:o})", self.path.display(), self.mode)]
    }
}

// ============================================================================
// Chown
// ============================================================================

#[derive(Deserialize)]
struct ChownParams {
    path: String,
    #[serde(default, alias = "owner_name")]
    owner: Option<String>,
    #[serde(default, alias = "group_name")]
    group: Option<String>,
}

pub struct Chown {
    pub path: PathBuf,
    pub owner: Option<String>,
    pub group: Option<String>,
}

pub(super) fn build_chown(entry: &Value, ctx: &BuildContext) -> Result<Box<dyn Step>> {
    let params: ChownParams = ctx.params(entry)?;
    if params.owner.is_none() && params.group.is_none() {
        return Err(Error::config_invalid_value(
            ctx.key.clone(),
            None,
            "chown needs an owner, a group, or both",
        ));
    }
    Ok(Box::new(Chown {
        path: PathBuf::from(params.path),
        owner: params.owner,
        group: params.group,
    }))
}

fn lookup_uid(name: &str) -> Result<u32> {
    if let Ok(uid) = name.parse::<u32>() {
        return Ok(uid);
    }
    let c_name = CString::new(name)
        .map_err(|_| Error::other(format!("invalid user name '{}'", name)))?;
    // SAFETY: getpwnam returns null or a pointer to static storage that stays
    // valid until the next getpw* call; steps run sequentially.
    let entry = unsafe { libc::getpwnam(c_name.as_ptr()) };
    if entry.is_null() {
        return Err(Error::other(format!("no such user '{}'", name)));
    }
    Ok(unsafe { (*entry).pw_uid })
}

fn lookup_gid(name: &str) -> Result<u32> {
    if let Ok(gid) = name.parse::<u32>() {
        return Ok(gid);
    }
    let c_name = CString::new(name)
        .map_err(|_| Error::other(format!("invalid group name '{}'", name)))?;
    // SAFETY: as for getpwnam above.
    let entry = unsafe { libc::getgrnam(c_name.as_ptr()) };
    if entry.is_null() {
        return Err(Error::other(format!("no such group '{}'", name)));
    }
    Ok(unsafe { (*entry).gr_gid })
}

impl Step for Chown {
    fn name(&self) -> &str {
        "Chown"
    }

    fn should_run(&self) -> bool {
        true
    }

    fn run(&mut self) -> Result<()> {
        let uid = self.owner.as_deref().map(lookup_uid).transpose()?;
        let gid = self.group.as_deref().map(lookup_gid).transpose()?;
        std::os::unix::fs::chown(&self.path, uid, gid)
            .map_err(|e| io_error(e, format!("chown {}", self.path.display())))
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!(
            "chown({} user={}, group={})",
            self.path.display(),
            self.owner.as_deref().unwrap_or("None"),
            self.group.as_deref().unwrap_or("None")
        )]
    }
}

// ============================================================================
// MakeDir
// ============================================================================

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

pub struct MakeDir {
    pub path: PathBuf,
}

pub(super) fn build_make_dir(entry: &Value, ctx: &BuildContext) -> Result<Box<dyn Step>> {
    let params: PathParams = ctx.params(entry)?;
    Ok(Box::new(MakeDir {
        path: PathBuf::from(params.path),
    }))
}

impl Step for MakeDir {
    fn name(&self) -> &str {
        "MakeDir"
    }

    fn should_run(&self) -> bool {
        true
    }

    fn run(&mut self) -> Result<()> {
        fs::create_dir_all(&self.path)
            .map_err(|e| io_error(e, format!("make directory {}", self.path.display())))
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!("make directory {}", self.path.display())]
    }
}

// ============================================================================
// InstallFile
// ============================================================================

#[derive(Deserialize)]
struct InstallFileParams {
    source: String,
    dest: String,
}

pub struct InstallFile {
    pub source: PathBuf,
    pub dest: PathBuf,
}

pub(super) fn build_install_file(entry: &Value, ctx: &BuildContext) -> Result<Box<dyn Step>> {
    let params: InstallFileParams = ctx.params(entry)?;
    Ok(Box::new(InstallFile {
        source: ctx.config_relative(&params.source),
        dest: PathBuf::from(params.dest),
    }))
}

fn same_contents(a: &Path, b: &Path) -> bool {
    match (fs::read(a), fs::read(b)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

impl Step for InstallFile {
    fn name(&self) -> &str {
        "InstallFile"
    }

    /// Only when the destination is missing or differs byte-for-byte.
    fn should_run(&self) -> bool {
        !same_contents(&self.source, &self.dest)
    }

    fn run(&mut self) -> Result<()> {
        fs::copy(&self.source, &self.dest).map(|_| ()).map_err(|e| {
            io_error(
                e,
                format!(
                    "install {} -> {}",
                    self.source.display(),
                    self.dest.display()
                ),
            )
        })
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!("install file {}", self.dest.display())]
    }
}

// ============================================================================
// Symlink / Unlink
// ============================================================================

#[derive(Deserialize)]
struct SymlinkParams {
    source: String,
    dest: String,
}

pub struct Symlink {
    pub source: PathBuf,
    pub dest: PathBuf,
}

pub(super) fn build_symlink(entry: &Value, ctx: &BuildContext) -> Result<Box<dyn Step>> {
    let params: SymlinkParams = ctx.params(entry)?;
    Ok(Box::new(Symlink {
        source: PathBuf::from(params.source),
        dest: PathBuf::from(params.dest),
    }))
}

impl Step for Symlink {
    fn name(&self) -> &str {
        "Symlink"
    }

    fn should_run(&self) -> bool {
        true
    }

    fn run(&mut self) -> Result<()> {
        match std::os::unix::fs::symlink(&self.source, &self.dest) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(io_error(
                e,
                format!(
                    "symlink {} -> {}",
                    self.source.display(),
                    self.dest.display()
                ),
            )),
        }
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!(
            "symlink {} -> {}",
            self.source.display(),
            self.dest.display()
        )]
    }
}

pub struct Unlink {
    pub path: PathBuf,
}

pub(super) fn build_unlink(entry: &Value, ctx: &BuildContext) -> Result<Box<dyn Step>> {
    let params: PathParams = ctx.params(entry)?;
    Ok(Box::new(Unlink {
        path: PathBuf::from(params.path),
    }))
}

impl Step for Unlink {
    fn name(&self) -> &str {
        "Unlink"
    }

    fn should_run(&self) -> bool {
        true
    }

    fn run(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e, format!("unlink {}", self.path.display()))),
        }
    }

    fn dry_run(&self) -> Vec<String> {
        vec![format!("unlink {}", self.path.display())]
    }
}
