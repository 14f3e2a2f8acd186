use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::allocator::DEFAULT_MAX_ATTEMPTS;
use crate::atomic::write_bytes_atomic;
use crate::version::VersionInfo;
use crate::Result;

pub const DEFAULT_PARENT_LOG_DIR: &str = "./logs";
pub const SETTINGS_FILE_NAME: &str = "labbook.toml";
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggerSettings {
    /// Directory holding one subdirectory per run.
    pub parent_log_dir: PathBuf,
    /// Resume this run id instead of allocating a new one.
    pub forced_log_id: Option<i64>,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            parent_log_dir: PathBuf::from(DEFAULT_PARENT_LOG_DIR),
            forced_log_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AllocatorSettings {
    /// Directory-creation collisions tolerated before allocation fails.
    pub max_attempts: u32,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Framework-level settings, read from `labbook.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FrameworkSettings {
    pub logger: LoggerSettings,
    pub allocator: AllocatorSettings,
}

impl FrameworkSettings {
    pub fn with_parent_log_dir(mut self, parent_log_dir: impl Into<PathBuf>) -> Self {
        self.logger.parent_log_dir = parent_log_dir.into();
        self
    }

    pub fn with_forced_log_id(mut self, forced_log_id: Option<i64>) -> Self {
        self.logger.forced_log_id = forced_log_id;
        self
    }
}

/// Load settings from `path`; a missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<FrameworkSettings> {
    if !path.exists() {
        return Ok(FrameworkSettings::default());
    }
    let content = std::fs::read_to_string(path)?;
    let settings: FrameworkSettings = toml::from_str(&content)?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &FrameworkSettings) -> Result<()> {
    let encoded = toml::to_string_pretty(settings)?;
    write_bytes_atomic(path, encoded.as_bytes())
}

/// The `framework` metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FrameworkDocument {
    pub version: String,
    pub settings: FrameworkSettings,
    /// Code snapshot supplied by the version manager, when one ran.
    pub code: Option<VersionInfo>,
}

impl FrameworkDocument {
    pub fn new(settings: FrameworkSettings, code: Option<VersionInfo>) -> Self {
        Self {
            version: FRAMEWORK_VERSION.to_string(),
            settings,
            code,
        }
    }
}
