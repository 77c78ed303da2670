use core::fmt::Debug;

use qfuse_tensor::quantization::RoundingMode;
use serde::{Deserialize, Serialize};

/// Configuration IO error.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid format.
    #[error("Config error => Invalid format: {0}")]
    InvalidFormat(String),

    /// File not found.
    #[error("Config error => File not found: {0}")]
    FileNotFound(String),
}

/// Configuration trait.
pub trait Config: Debug + Serialize + serde::de::DeserializeOwned {
    /// Saves the configuration to a file.
    fn save<P: AsRef<std::path::Path>>(&self, file: P) -> std::io::Result<()> {
        let json = config_to_json(self).map_err(std::io::Error::other)?;
        std::fs::write(file, json)
    }

    /// Loads the configuration from a file.
    fn load<P: AsRef<std::path::Path>>(file: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file.as_ref())
            .map_err(|_| ConfigError::FileNotFound(file.as_ref().to_string_lossy().to_string()))?;
        config_from_str(&content)
    }

    /// Loads the configuration from a binary buffer.
    fn load_binary(data: &[u8]) -> Result<Self, ConfigError> {
        let content = core::str::from_utf8(data).map_err(|_| {
            ConfigError::InvalidFormat("Could not parse data as utf-8.".to_string())
        })?;
        config_from_str(content)
    }
}

/// Converts a configuration to a JSON string.
pub fn config_to_json<C: Config>(config: &C) -> Result<String, ConfigError> {
    serde_json::to_string_pretty(config).map_err(|err| ConfigError::InvalidFormat(format!("{err}")))
}

fn config_from_str<C: Config>(content: &str) -> Result<C, ConfigError> {
    serde_json::from_str(content).map_err(|err| ConfigError::InvalidFormat(format!("{err}")))
}

/// Options of the kernel compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Rounding mode of the quantize step.
    #[serde(default)]
    pub rounding: RoundingMode,
    /// Log the synthesized program at the `trace` level.
    #[serde(default)]
    pub log_program: bool,
}

impl Config for CompileOptions {}

impl CompileOptions {
    /// Set the rounding mode of the quantize step.
    pub fn with_rounding(mut self, rounding: RoundingMode) -> Self {
        self.rounding = rounding;
        self
    }

    /// Log the synthesized program at the `trace` level.
    pub fn with_log_program(mut self, log_program: bool) -> Self {
        self.log_program = log_program;
        self
    }
}
