//! Packaging the config directory and the runner for transfer, and unpacking
//! the archive again on the target.
//!
//! The archive is a gzip tar whose only top-level entry is `config/`. The
//! runner is staged next to it as `cattle-run`. Both are built once per
//! execution and shared read-only with every host.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::execution::{ExecutionId, ARCHIVE_NAME, CONFIG_DIR, RUNNER_NAME};
use crate::paths;
use crate::utils::io;

/// Overrides where the runner binary is picked up from.
pub const RUNNER_ENV: &str = "CATTLE_RUNNER";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub staging_dir: PathBuf,
    pub archive: PathBuf,
    pub executable: PathBuf,
    pub archive_sha256: String,
    pub file_count: usize,
}

impl Package {
    /// Remove the local staging directory.
    pub fn cleanup(&self) {
        if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
            log::debug!("leaving staging dir {}: {}", self.staging_dir.display(), e);
        }
    }
}

fn io_err(e: std::io::Error, context: String) -> Error {
    Error::internal_io(e.to_string(), Some(context))
}

/// Stage the archive and runner for `execution_id`.
pub fn build(
    config_dir: &Path,
    runner: &Path,
    execution_id: &ExecutionId,
    excludes: &[String],
) -> Result<Package> {
    let staging_dir = paths::staging(execution_id.as_str());
    io::ensure_dir(&staging_dir, "create staging dir")?;

    let archive = staging_dir.join(ARCHIVE_NAME);
    let file_count = build_archive(config_dir, &archive, excludes)?;

    let executable = staging_dir.join(RUNNER_NAME);
    fs::copy(runner, &executable)
        .map_err(|e| io_err(e, format!("stage runner {}", runner.display())))?;
    fs::set_permissions(&executable, fs::Permissions::from_mode(0o755))
        .map_err(|e| io_err(e, "mark runner executable".to_string()))?;

    let archive_sha256 = sha256_file(&archive)?;
    log_status!(
        "package",
        "Packaged {} files from {} ({})",
        file_count,
        config_dir.display(),
        &archive_sha256[..12]
    );

    Ok(Package {
        staging_dir,
        archive,
        executable,
        archive_sha256,
        file_count,
    })
}

/// True when any component of `relative` matches an exclude glob.
pub fn is_excluded(relative: &Path, excludes: &[String]) -> bool {
    relative.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        excludes
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, &name))
    })
}

/// Write `config_dir` into a gzip tar at `archive` under the `config/`
/// prefix. Returns the number of files archived.
pub fn build_archive(config_dir: &Path, archive: &Path, excludes: &[String]) -> Result<usize> {
    if !config_dir.is_dir() {
        return Err(Error::config_not_found(config_dir.display().to_string()));
    }

    let file = File::create(archive)
        .map_err(|e| io_err(e, format!("create archive {}", archive.display())))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    builder
        .append_dir(CONFIG_DIR, config_dir)
        .map_err(|e| io_err(e, "archive config dir".to_string()))?;

    let walker = WalkDir::new(config_dir)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry.path().strip_prefix(config_dir).unwrap_or(entry.path());
            !is_excluded(relative, excludes)
        });

    let mut file_count = 0;
    for entry in walker {
        let entry = entry.map_err(|e| {
            Error::internal_io(e.to_string(), Some("walk config dir".to_string()))
        })?;
        let relative = entry
            .path()
            .strip_prefix(config_dir)
            .map_err(|e| Error::internal_unexpected(e.to_string()))?;
        let name = Path::new(CONFIG_DIR).join(relative);

        if entry.file_type().is_dir() {
            builder
                .append_dir(&name, entry.path())
                .map_err(|e| io_err(e, format!("archive {}", name.display())))?;
        } else {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(|e| io_err(e, format!("archive {}", name.display())))?;
            file_count += 1;
        }
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| io_err(e, format!("finish archive {}", archive.display())))?;

    Ok(file_count)
}

/// Unpack a config archive into `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .map_err(|e| io_err(e, format!("open archive {}", archive.display())))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
        .map_err(|e| io_err(e, format!("extract {} into {}", archive.display(), dest.display())))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).map_err(|e| io_err(e, format!("open {}", path.display())))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| io_err(e, format!("hash {}", path.display())))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Find the runner binary: an explicit path, then `$CATTLE_RUNNER`, then a
/// `cattle-run` next to the current executable.
pub fn locate_runner(explicit: Option<&Path>) -> Result<PathBuf> {
    let candidate = match explicit {
        Some(path) => path.to_path_buf(),
        None => match std::env::var(RUNNER_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(shellexpand::tilde(&path).to_string()),
            _ => {
                let exe = std::env::current_exe()
                    .map_err(|e| io_err(e, "locate current executable".to_string()))?;
                exe.parent()
                    .map(|dir| dir.join(RUNNER_NAME))
                    .unwrap_or_else(|| PathBuf::from(RUNNER_NAME))
            }
        },
    };

    if !candidate.is_file() {
        return Err(Error::validation_invalid_argument(
            "runner",
            "Runner executable not found",
            Some(candidate.display().to_string()),
            None,
        )
        .with_hint(format!(
            "Pass --runner or set {} to the cattle-run binary",
            RUNNER_ENV
        )));
    }

    Ok(candidate)
}
