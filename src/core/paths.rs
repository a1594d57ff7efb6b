use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base cattle config directory (universal ~/.config/cattle/ on all platforms)
pub fn cattle() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("cattle"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("cattle"))
    }
}

/// Global cattle.json config file path
pub fn cattle_json() -> Result<PathBuf> {
    Ok(cattle()?.join("cattle.json"))
}

/// Scratch directory for packaging one execution before fan-out.
pub fn staging(execution_id: &str) -> PathBuf {
    env::temp_dir().join(format!("cattle-stage-{}", execution_id))
}

/// Directory for ssh control sockets (short path; sun_path is limited to ~104 bytes).
pub fn control_sockets() -> PathBuf {
    env::temp_dir().join("cattle-ssh")
}
