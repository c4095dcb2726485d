use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PhaselaneError, Result};
use crate::logger::LogLevel;
use crate::paths;
use crate::policy::AllowListPolicy;
use crate::types::{DeveloperLaneConfig, LaneKey};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeveloperLaneSettings {
    #[serde(default)]
    pub validate_story_context: bool,
    #[serde(default = "default_validation_lane")]
    pub validation_lane: String,
}

fn default_validation_lane() -> String {
    LaneKey::review().as_str().to_string()
}

impl Default for DeveloperLaneSettings {
    fn default() -> Self {
        Self {
            validate_story_context: false,
            validation_lane: default_validation_lane(),
        }
    }
}

impl From<&DeveloperLaneSettings> for DeveloperLaneConfig {
    fn from(settings: &DeveloperLaneSettings) -> Self {
        DeveloperLaneConfig {
            validate_story_context: settings.validate_story_context,
            validation_lane: LaneKey::new(settings.validation_lane.trim()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_allowed_operations")]
    pub allowed_operations: Vec<String>,
}

fn default_allowed_operations() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_operations: default_allowed_operations(),
        }
    }
}

/// An external program plus its arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Per-lane overrides, keyed by lane name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lanes: BTreeMap<String, CommandConfig>,
}

fn default_timeout_seconds() -> u64 {
    600
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_seconds: default_timeout_seconds(),
            lanes: BTreeMap::new(),
        }
    }
}

impl AgentsConfig {
    /// The command for `lane`: its override when one names a command,
    /// otherwise the default agent command.
    pub fn command_for(&self, lane: Option<&LaneKey>) -> CommandConfig {
        lane.and_then(|l| self.lanes.get(l.as_str()))
            .filter(|c| c.command.is_some())
            .cloned()
            .unwrap_or_else(|| CommandConfig {
                command: self.command.clone(),
                args: self.args.clone(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            metrics_file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub developer_lane: DeveloperLaneSettings,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub quick_lane: CommandConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self::new("")
    }
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
            },
            developer_lane: DeveloperLaneSettings::default(),
            policy: PolicyConfig::default(),
            agents: AgentsConfig::default(),
            quick_lane: CommandConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(PhaselaneError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Like [`Config::load`], but an uninitialized project gets defaults.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        match Self::load(root) {
            Err(PhaselaneError::NotInitialized) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::config_path(root), data.as_bytes())
    }

    pub fn developer_lane(&self) -> DeveloperLaneConfig {
        DeveloperLaneConfig::from(&self.developer_lane)
    }

    /// The allow list, with `override_list` (a comma list) taking
    /// precedence over the configured operations.
    pub fn allow_list(&self, override_list: Option<&str>) -> AllowListPolicy {
        match override_list {
            Some(list) => AllowListPolicy::parse(list),
            None => AllowListPolicy::new(&self.policy.allowed_operations),
        }
    }

    /// The configured allow list unless `PHASELANE_ALLOWED_OPERATIONS` is set.
    pub fn effective_policy(&self) -> AllowListPolicy {
        AllowListPolicy::from_env().unwrap_or_else(|| self.allow_list(None))
    }

    pub fn log_level(&self) -> Result<LogLevel> {
        self.logging
            .level
            .parse()
            .map_err(PhaselaneError::InvalidArguments)
    }

    pub fn metrics_file(&self, root: &Path) -> Option<PathBuf> {
        self.logging
            .metrics_file
            .as_deref()
            .map(|p| paths::resolve(root, p))
    }
}
