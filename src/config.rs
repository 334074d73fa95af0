//! Kernel configuration
//!
//! Loaded from TOML at startup, falls back to defaults if no config file
//! exists. Command-line flags override what the file says.

use opkernel_controller::{ControllerConfig, ControllerMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub controller: ControllerSection,
    pub persistence: PersistenceSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    /// `runtime` or `admin-only`.
    pub mode: ControllerMode,
    /// Writer lane capacity.
    pub queue_depth: usize,
    /// Committed writes kept for undo.
    pub history_limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    /// JSON snapshot of the configuration model, rewritten after every commit.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily-rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Where a loaded [`KernelConfig`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No readable file; defaults apply.
    Missing(PathBuf),
    /// The file did not parse; defaults apply.
    Invalid { path: PathBuf, error: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            Self::File(path) => tracing::info!("Loaded config from {}", path.display()),
            Self::Missing(path) => tracing::info!("No config at {}; using defaults", path.display()),
            Self::Invalid { path, error } => {
                tracing::warn!("Failed to parse {}: {}; using defaults", path.display(), error)
            }
        }
    }
}

impl Default for ControllerSection {
    fn default() -> Self {
        let defaults = ControllerConfig::default();
        Self {
            mode: defaults.mode,
            queue_depth: defaults.queue_depth,
            history_limit: defaults.history_limit,
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "opkernel=info".to_string(),
            log_dir: None,
        }
    }
}

impl KernelConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let (config, source) = Self::read(path);
        source.log();
        config
    }

    /// Like [`load`](Self::load), but hands back where the config came from
    /// instead of logging it, for callers that install tracing afterwards.
    pub fn read(path: &Path) -> (Self, ConfigSource) {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return (Self::default(), ConfigSource::Missing(path.to_path_buf())),
        };
        match toml::from_str(&content) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (
                Self::default(),
                ConfigSource::Invalid {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                },
            ),
        }
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            mode: self.controller.mode,
            queue_depth: self.controller.queue_depth,
            history_limit: self.controller.history_limit,
        }
    }
}
