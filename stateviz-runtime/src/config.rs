//! Inspector configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STATEVIZ_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "STATEVIZ_CONFIG";

/// Inspector configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interpreter configuration.
    pub interpreter: InterpreterConfig,
    /// Service queue and broadcast configuration.
    pub runtime: RuntimeConfig,
    /// Terminal front end configuration.
    pub inspector: InspectorConfig,
}

impl Config {
    /// Loads configuration from the file named by STATEVIZ_CONFIG (if any),
    /// then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads configuration from an explicit file (if any), then applies
    /// environment variable overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a variable lookup.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.interpreter.apply_overrides(&var);
        self.runtime.apply_overrides(&var);
        self.inspector.apply_overrides(&var);
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.transient_limit == 0 {
            return Err(ConfigError::ValidationError(
                "interpreter.transient_limit must be at least 1".to_string(),
            ));
        }
        if self.runtime.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.runtime.broadcast_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.broadcast_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Interpreter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Maximum internal microsteps (eventless transitions and completion
    /// events) per external event.
    pub transient_limit: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            transient_limit: stateviz_core::DEFAULT_TRANSIENT_LIMIT,
        }
    }
}

impl InterpreterConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(limit) = var("STATEVIZ_TRANSIENT_LIMIT") {
            if let Ok(n) = limit.parse() {
                self.transient_limit = n;
            }
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of the service command queue.
    pub queue_capacity: usize,
    /// Capacity of the snapshot broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            broadcast_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(capacity) = var("STATEVIZ_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.queue_capacity = n;
            }
        }

        if let Some(capacity) = var("STATEVIZ_BROADCAST_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.broadcast_capacity = n;
            }
        }
    }
}

/// Terminal front end configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InspectorConfig {
    /// Machine definition loaded at startup.
    pub machine: Option<PathBuf>,
    /// REPL history file (defaults to ~/.stateviz_history).
    pub history_file: Option<PathBuf>,
    /// Colored output.
    pub color: bool,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            machine: None,
            history_file: None,
            color: true,
        }
    }
}

impl InspectorConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("STATEVIZ_MACHINE") {
            if !path.is_empty() {
                self.machine = Some(PathBuf::from(path));
            }
        }

        if let Some(color) = var("STATEVIZ_COLOR") {
            self.color = color == "1" || color.to_lowercase() == "true";
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {err}", path = .0.display(), err = .1)]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{path}': {err}", path = .0.display(), err = .1)]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}
