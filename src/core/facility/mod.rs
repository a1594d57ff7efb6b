//! Built-in step implementations ("facilities") and the registry that maps
//! manifest entries onto them.
//!
//! A manifest entry is a JSON object whose `type` names a facility; the
//! remaining keys are that facility's parameters:
//!
//! ```json
//! { "type": "install_file", "source": "poem.txt", "dest": "/var/poems/poem.txt" }
//! ```
//!
//! The registry is handed to the config loader explicitly, so configurations
//! can only name facilities the runner was built with.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::step::Step;

pub mod file;
pub mod flaky;
pub mod system;

pub use file::{Chmod, Chown, InstallFile, MakeDir, Symlink, Unlink};
pub use flaky::FlakyAction;
pub use system::{InstallDebPackages, RestartSystemdService};

/// What a facility constructor gets to see besides its own parameters.
pub struct BuildContext<'a> {
    /// Directory holding the config manifest; relative sources resolve here.
    pub config_dir: &'a Path,
    /// Manifest key path of the entry being built, e.g. `steps[2]`.
    pub key: String,
}

impl BuildContext<'_> {
    /// Resolve a manifest path relative to the config directory.
    pub fn config_relative(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.config_dir.join(candidate)
        }
    }

    /// Deserialize this entry's parameters.
    pub fn params<T: DeserializeOwned>(&self, entry: &Value) -> Result<T> {
        serde_json::from_value(entry.clone()).map_err(|e| {
            Error::config_invalid_value(self.key.clone(), Some(entry.to_string()), e.to_string())
        })
    }
}

pub type FacilityBuilder = fn(&Value, &BuildContext) -> Result<Box<dyn Step>>;

pub struct FacilityRegistry {
    builders: BTreeMap<&'static str, FacilityBuilder>,
}

impl FacilityRegistry {
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// Registry with every facility that ships with cattle.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("chmod", file::build_chmod);
        registry.register("chown", file::build_chown);
        registry.register("make_dir", file::build_make_dir);
        registry.register("install_file", file::build_install_file);
        registry.register("symlink", file::build_symlink);
        registry.register("unlink", file::build_unlink);
        registry.register("install_deb_packages", system::build_install_deb_packages);
        registry.register("restart_systemd_service", system::build_restart_systemd_service);
        registry.register("flaky", flaky::build_flaky);
        registry
    }

    pub fn register(&mut self, name: &'static str, builder: FacilityBuilder) {
        self.builders.insert(name, builder);
    }

    pub fn names(&self) -> Vec<String> {
        self.builders.keys().map(|k| k.to_string()).collect()
    }

    pub fn build(&self, entry: &Value, ctx: &BuildContext) -> Result<Box<dyn Step>> {
        let kind = entry
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::config_missing_key(format!("{}.type", ctx.key), None))?;

        let builder = self.builders.get(kind).ok_or_else(|| {
            Error::config_invalid_value(
                format!("{}.type", ctx.key),
                Some(kind.to_string()),
                format!("unknown facility '{}'", kind),
            )
            .with_hint(format!("Known facilities: {}", self.names().join(", ")))
        })?;

        builder(entry, ctx)
    }
}

impl Default for FacilityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
