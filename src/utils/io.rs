//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Read file contents, mapping a missing file to `None`.
pub fn read_file_optional(path: &Path, operation: &str) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::internal_io(e.to_string(), Some(operation.to_string()))),
    }
}

/// Write content to file atomically (write to .tmp, then rename).
///
/// Readers polling the file see either the old content or the new content,
/// never a partial write.
pub fn write_file_atomic(path: &Path, content: &str, operation: &str) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;

    let filename = path.file_name().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;

    let tmp_path = parent.join(format!(".{}.tmp", filename.to_string_lossy()));

    fs::write(&tmp_path, content)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("{} (write temp)", operation))))?;

    fs::rename(&tmp_path, path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("{} (rename)", operation))))?;

    Ok(())
}

/// Create a directory and all parents.
pub fn ensure_dir(path: &Path, operation: &str) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))
}

/// Copy `source` into `dest_dir`, keeping its file name and permission bits.
/// Returns the destination path.
pub fn copy_into(source: &Path, dest_dir: &Path) -> Result<std::path::PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        Error::validation_invalid_argument(
            "source",
            "Source path must include a file name",
            Some(source.display().to_string()),
            None,
        )
    })?;
    let dest = dest_dir.join(name);

    fs::copy(source, &dest).map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("copy {} -> {}", source.display(), dest.display())),
        )
    })?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_file_optional_maps_missing_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_file_optional(&dir.path().join("absent"), "test read").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn write_file_atomic_replaces_content_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("STATUS");

        write_file_atomic(&path, "PROGRESS", "test write").unwrap();
        write_file_atomic(&path, "DONE", "test write").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "DONE");
        assert!(!dir.path().join(".STATUS.tmp").exists());
    }

    #[test]
    fn write_file_atomic_reports_io_error_for_missing_dir() {
        let err = write_file_atomic(Path::new("/nonexistent/dir/STATUS"), "x", "test write")
            .unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
    }

    #[test]
    fn copy_into_keeps_file_name() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("payload.bin");
        fs::write(&source, b"bytes").unwrap();

        let dest = copy_into(&source, dest_dir.path()).unwrap();
        assert_eq!(dest, dest_dir.path().join("payload.bin"));
        assert_eq!(fs::read(dest).unwrap(), b"bytes");
    }
}
