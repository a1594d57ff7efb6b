//! Loading a configuration directory into an ordered step sequence.
//!
//! A configuration directory holds a JSON manifest (the "config module",
//! `cattle.json` by default) plus any files its steps reference. The manifest
//! must expose exactly one sequence under `steps`.

use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::facility::{BuildContext, FacilityRegistry};
use crate::step::Step;
use crate::utils::io;

pub const STEPS_KEY: &str = "steps";

pub struct LoadedConfig {
    pub manifest_path: PathBuf,
    pub steps: Vec<Box<dyn Step>>,
}

impl fmt::Debug for LoadedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedConfig")
            .field("manifest_path", &self.manifest_path)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Resolve the manifest path for a config module name. A bare name gets the
/// `.json` extension.
pub fn manifest_path(config_dir: &Path, config_module: &str) -> PathBuf {
    let module = config_module.trim();
    if Path::new(module).extension().is_some() {
        config_dir.join(module)
    } else {
        config_dir.join(format!("{}.json", module))
    }
}

pub fn load(
    config_dir: &Path,
    config_module: &str,
    registry: &FacilityRegistry,
) -> Result<LoadedConfig> {
    let manifest_path = manifest_path(config_dir, config_module);
    let display = manifest_path.display().to_string();

    let content = io::read_file_optional(&manifest_path, "read config module")?
        .ok_or_else(|| Error::config_not_found(display.clone()))?;

    let manifest: Value = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(display.clone(), e))?;

    let entries = manifest
        .get(STEPS_KEY)
        .ok_or_else(|| Error::config_missing_key(STEPS_KEY, Some(display.clone())))?
        .as_array()
        .ok_or_else(|| {
            Error::config_invalid_value(STEPS_KEY, None, "steps must be a list of step objects")
        })?;

    let steps = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let ctx = BuildContext {
                config_dir,
                key: format!("{}[{}]", STEPS_KEY, i + 1),
            };
            registry.build(entry, &ctx)
        })
        .collect::<Result<Vec<_>>>()?;

    log::debug!("loaded {} steps from {}", steps.len(), display);

    Ok(LoadedConfig {
        manifest_path,
        steps,
    })
}
