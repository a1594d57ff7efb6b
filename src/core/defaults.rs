use serde::{Deserialize, Serialize};
use std::fs;

use crate::paths;

/// Root configuration structure for cattle.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CattleConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via cattle.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_run_root")]
    pub run_root: String,

    #[serde(default = "default_config_module")]
    pub config_module: String,

    #[serde(default = "default_password_env")]
    pub password_env: String,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_ssh")]
    pub ssh: SshConfig,

    #[serde(default = "default_package")]
    pub package: PackageConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            run_root: default_run_root(),
            config_module: default_config_module(),
            password_env: default_password_env(),
            max_workers: default_max_workers(),
            ssh: default_ssh(),
            package: default_package(),
        }
    }
}

/// Configuration for ssh/scp transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_port")]
    pub default_port: u16,

    #[serde(default)]
    pub default_username: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u32,

    #[serde(default = "default_scp_flags")]
    pub scp_flags: Vec<String>,
}

/// Configuration for the config archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_run_root() -> String {
    "/tmp/cattle".to_string()
}

fn default_config_module() -> String {
    "cattle.json".to_string()
}

fn default_password_env() -> String {
    "CATTLE_PASSWORD".to_string()
}

fn default_max_workers() -> usize {
    32
}

fn default_ssh() -> SshConfig {
    SshConfig {
        default_port: default_ssh_port(),
        default_username: None,
        connect_timeout_secs: default_connect_timeout(),
        scp_flags: default_scp_flags(),
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u32 {
    10
}

fn default_scp_flags() -> Vec<String> {
    vec!["-q".to_string(), "-p".to_string()]
}

fn default_package() -> PackageConfig {
    PackageConfig {
        excludes: default_excludes(),
    }
}

fn default_excludes() -> Vec<String> {
    [".git", "target", "__pycache__", "*.pyc", ".DS_Store", "*.swp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// =============================================================================
// Loading
// =============================================================================

/// Load defaults from cattle.json, falling back to built-ins when the file is
/// missing or unreadable.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

pub fn load_config() -> CattleConfig {
    let path = match paths::cattle_json() {
        Ok(p) => p,
        Err(_) => return CattleConfig::default(),
    };

    if !path.exists() {
        return CattleConfig::default();
    }

    match fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            log::warn!("Ignoring invalid {}: {}", path.display(), e);
            CattleConfig::default()
        }),
        Err(_) => CattleConfig::default(),
    }
}

fn parse_config(content: &str) -> serde_json::Result<CattleConfig> {
    serde_json::from_str(content)
}
