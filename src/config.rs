//! Worker-wide configuration.
//!
//! Loaded once at startup and injected into the handler. Every field has a
//! default, so a config file only needs the keys it wants to change.

use crate::model::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// File names probed by [`WorkerConfig::load_with_defaults`].
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["exif-worker.toml", ".exif-worker.toml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub tool: ToolConfig,
    pub execution: ExecutionConfig,
}

/// How the extraction tool is invoked.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    pub binary: String,

    /// Flags passed before the format flag on every run
    pub baseline_flags: Vec<String>,

    pub json_flag: String,

    pub plain_flag: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per-input limit on the extraction process, in seconds
    pub timeout_secs: u64,

    /// Number of tasks the worker runs at once
    pub concurrency: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: "exiftool".to_string(),
            // -m: demote minor errors to warnings, -q: no progress chatter
            baseline_flags: vec!["-m".to_string(), "-q".to_string()],
            json_flag: "-json".to_string(),
            plain_flag: "-G".to_string(),
        }
    }
}

impl ToolConfig {
    pub fn format_flag(&self, format: OutputFormat) -> &str {
        match format {
            OutputFormat::Json => &self.json_flag,
            OutputFormat::Plain => &self.plain_flag,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300, // 5 minutes
            concurrency: 4,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub binary: Option<String>,
    pub timeout_secs: Option<u64>,
    pub concurrency: Option<usize>,
}

impl WorkerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        if !path.exists() {
            return Err(ConfigError::NotFound(display));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Loads `config_path` if given, else the first default file present,
    /// else built-in defaults.
    pub fn load_with_defaults<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_file(path),
            None => {
                for default_path in DEFAULT_CONFIG_FILES {
                    if Path::new(default_path).exists() {
                        return Self::load_from_file(default_path);
                    }
                }
                Ok(Self::default())
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref binary) = overrides.binary {
            self.tool.binary = binary.clone();
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.execution.timeout_secs = timeout;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.execution.concurrency = concurrency;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tool.binary.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "tool.binary must not be empty".to_string(),
            ));
        }

        if self.tool.json_flag.is_empty() || self.tool.plain_flag.is_empty() {
            return Err(ConfigError::Invalid(
                "tool.json_flag and tool.plain_flag must not be empty".to_string(),
            ));
        }

        if self.tool.json_flag == self.tool.plain_flag {
            return Err(ConfigError::Invalid(format!(
                "tool.json_flag and tool.plain_flag must differ (both '{}')",
                self.tool.json_flag
            )));
        }

        if self.execution.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "execution.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.execution.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "execution.concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.execution.timeout_secs)
    }

    /// Default configuration rendered as TOML.
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}
