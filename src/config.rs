//! Application configuration, read from a YAML file.
//!
//! Every field has a default, so an empty or missing file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::DEFAULT_MAX_LOG_LINES;
use crate::rsync::exit_codes::ExitCodeTable;

pub const APP_DIR_NAME: &str = "copier";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const SETTINGS_FILE_NAME: &str = "settings.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Executable to run; a bare name is looked up on PATH.
    pub rsync_program: PathBuf,
    /// Working directory for rsync; inherits ours when unset.
    pub working_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Wait between SIGTERM and SIGKILL when interrupting.
    pub grace_period_ms: u64,
    pub max_log_lines: usize,
    pub settings_path: Option<PathBuf>,
    /// Extra or replacement exit-code explanations.
    pub exit_codes: BTreeMap<i32, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rsync_program: PathBuf::from("rsync"),
            working_dir: None,
            poll_interval_ms: 100,
            grace_period_ms: 2000,
            max_log_lines: DEFAULT_MAX_LOG_LINES,
            settings_path: None,
            exit_codes: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the default location when it exists, or
    /// fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn exit_code_table(&self) -> ExitCodeTable {
        ExitCodeTable::with_overrides(&self.exit_codes)
    }

    /// Explicit `settings_path`, else the per-user default.
    pub fn resolved_settings_path(&self) -> Option<PathBuf> {
        self.settings_path
            .clone()
            .or_else(|| dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME)))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
