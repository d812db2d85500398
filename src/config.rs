//! Configuration module for template-ops
//!
//! Handles loading process-wide settings from multiple sources:
//! - Default values (matching the historical on-box constants)
//! - Configuration file (`--config`, `$TEMPLATE_OPS_CONFIG`, `./template-ops.yml`,
//!   `./template-ops.toml`, `~/.template-ops.yml`)
//! - Environment variables

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem locations
    pub paths: PathsConfig,

    /// Execution engine settings
    pub execution: ExecutionConfig,

    /// Archival of rendered templates and applied payloads
    pub archive: ArchiveConfig,

    /// Template variable generator kind -> selector names
    pub generators: GeneratorsConfig,

    /// NETCONF transport settings
    pub netconf: NetconfConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Template search root (`<name>.j2` files)
    pub templates: PathBuf,

    /// Default archive directory
    pub archive: PathBuf,

    /// Profile inventory file
    pub inventory: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            templates: PathBuf::from("./xtemplate"),
            archive: PathBuf::from("./xarchive"),
            inventory: PathBuf::from("./profiles.yml"),
        }
    }
}

/// Execution engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum devices in one profile stage
    pub max_profile_devices: usize,

    /// Commit timeout in seconds
    pub commit_timeout: u64,

    /// Retry a failed load/commit once with delete statements removed
    pub strip_delete_retry: bool,

    /// Allow execute-mode jobs
    pub exec_enabled: bool,

    /// Template vars selectors whose output may be diffed or pushed
    pub diff_push_eligible: Vec<String>,

    /// Handler used by execute-mode jobs that do not name one
    pub default_handler: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_profile_devices: 16,
            commit_timeout: 30,
            strip_delete_retry: true,
            exec_enabled: true,
            diff_push_eligible: vec!["mx".to_string(), "vsrx".to_string(), "exec1".to_string()],
            default_handler: "cli".to_string(),
        }
    }
}

impl ExecutionConfig {
    /// Commit timeout as a duration
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout)
    }

    /// Whether output of the given template vars selector may be applied to a device
    pub fn is_eligible(&self, template_vars: &str) -> bool {
        self.diff_push_eligible.iter().any(|v| v == template_vars)
    }
}

/// Process-wide archival defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Archive the template file after a commit
    pub commit_template: bool,

    /// Archive the rendered payload after a commit
    pub commit_payload: bool,

    /// Archive the template file after execution
    pub exec_template: bool,

    /// Archive the rendered code after execution
    pub exec_payload: bool,

    /// Directory override for commit archives
    pub commit_dir: Option<PathBuf>,

    /// Directory override for execute archives
    pub exec_dir: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            commit_template: true,
            commit_payload: true,
            exec_template: true,
            exec_payload: true,
            commit_dir: None,
            exec_dir: None,
        }
    }
}

/// Generator kind -> list of template vars selectors bound to it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratorsConfig(pub IndexMap<String, Vec<String>>);

impl Default for GeneratorsConfig {
    fn default() -> Self {
        let mut map = IndexMap::new();
        map.insert("sequence".to_string(), vec!["vsrx".to_string()]);
        map.insert(
            "interface".to_string(),
            vec!["ptx".to_string(), "mx".to_string()],
        );
        map.insert("passthrough".to_string(), vec!["exec1".to_string()]);
        map.insert("yaml".to_string(), vec!["srx_yaml1".to_string()]);
        Self(map)
    }
}

/// NETCONF transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetconfConfig {
    /// SSH executable
    pub ssh_executable: String,

    /// Extra SSH arguments
    pub ssh_args: Vec<String>,

    /// Connect probe timeout in seconds
    pub connect_timeout: u64,

    /// Command spawning a local NETCONF session for `local`/`localhost` targets
    pub local_command: Vec<String>,
}

impl Default for NetconfConfig {
    fn default() -> Self {
        Self {
            ssh_executable: "ssh".to_string(),
            ssh_args: vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
            ],
            connect_timeout: 2,
            local_command: vec![
                "cli".to_string(),
                "xml-mode".to_string(),
                "netconf".to_string(),
                "need-trailer".to_string(),
            ],
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level when neither `RUST_LOG` nor `-v` is given
    pub level: String,

    /// Emit JSON log lines
    pub json: bool,

    /// Append logs to this file instead of stderr
    pub log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
            log_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the first existing file plus environment overrides
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path) {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check, in priority order
    fn get_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(path) = explicit_path {
            paths.push(path.to_path_buf());
            return paths;
        }

        if let Ok(env_config) = std::env::var("TEMPLATE_OPS_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        paths.push(PathBuf::from("template-ops.yml"));
        paths.push(PathBuf::from("template-ops.toml"));

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".template-ops.yml"));
        }

        paths
    }

    fn find_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
        let paths = Self::get_config_paths(explicit_path);
        if explicit_path.is_some() {
            return paths.into_iter().next();
        }
        paths.into_iter().find(|p| p.exists())
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .map_err(|e| {
                    Error::Config(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?,
        };

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("TEMPLATE_OPS_MAX_PROFILE_DEVICES") {
            if let Ok(n) = max.parse() {
                self.execution.max_profile_devices = n;
            }
        }

        if let Ok(timeout) = std::env::var("TEMPLATE_OPS_COMMIT_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.execution.commit_timeout = n;
            }
        }

        if let Ok(path) = std::env::var("TEMPLATE_OPS_TEMPLATE_PATH") {
            self.paths.templates = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("TEMPLATE_OPS_INVENTORY") {
            self.paths.inventory = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("TEMPLATE_OPS_LOG_PATH") {
            self.logging.log_path = Some(PathBuf::from(path));
        }
    }

    /// Directory receiving commit archives
    pub fn commit_archive_dir(&self) -> &Path {
        self.archive
            .commit_dir
            .as_deref()
            .unwrap_or(&self.paths.archive)
    }

    /// Directory receiving execute archives
    pub fn exec_archive_dir(&self) -> &Path {
        self.archive.exec_dir.as_deref().unwrap_or(&self.paths.archive)
    }
}
