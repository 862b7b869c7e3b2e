//! Slotgen Configuration
//!
//! Handles parsing and management of slotgen.toml configuration files.

use crate::codegen::ExecutionMode;
use crate::scan::ScanConfig;
use crate::text_converter::EscapeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Name of the configuration file searched for by [`ConverterConfig::find_and_load`]
pub const CONFIG_FILE_NAME: &str = "slotgen.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching slotgen.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConverterConfig {
    /// Text format
    #[serde(default)]
    pub text: TextConfig,

    /// Code generation
    #[serde(default)]
    pub codegen: CodegenConfig,

    /// Scanner behaviour
    #[serde(default)]
    pub scan: ScanSettings,
}

impl ConverterConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: ConverterConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that delimiters are single bytes and limits are sane.
    pub fn validate(&self) -> ConfigResult<()> {
        let field = single_byte("text.field_delim", &self.text.field_delim)?;
        let line = single_byte("text.line_delim", &self.text.line_delim)?;
        if field == line {
            return Err(ConfigError::Invalid(
                "text.line_delim",
                "must differ from text.field_delim".to_string(),
            ));
        }
        if let Some(escape) = self.escape()? {
            if escape == field || escape == line {
                return Err(ConfigError::Invalid(
                    "text.escape_char",
                    "must differ from the delimiters".to_string(),
                ));
            }
        }
        if self.scan.workers == 0 {
            return Err(ConfigError::Invalid("scan.workers", "must be at least 1".to_string()));
        }
        Ok(())
    }

    fn escape(&self) -> ConfigResult<Option<u8>> {
        if self.text.escape_char.is_empty() {
            Ok(None)
        } else {
            single_byte("text.escape_char", &self.text.escape_char).map(Some)
        }
    }

    pub fn escape_config(&self) -> ConfigResult<EscapeConfig> {
        Ok(match self.escape()? {
            Some(b) => EscapeConfig::byte(b),
            None => EscapeConfig::none(),
        })
    }

    /// Scanner settings described by this configuration.
    pub fn scan_config(&self) -> ConfigResult<ScanConfig> {
        self.validate()?;
        Ok(ScanConfig {
            field_delim: single_byte("text.field_delim", &self.text.field_delim)?,
            line_delim: single_byte("text.line_delim", &self.text.line_delim)?,
            escape: self.escape_config()?,
            copy_strings: self.scan.copy_strings,
            abort_on_error: self.scan.abort_on_error,
            use_codegen: self.codegen.enabled,
            max_recorded_errors: self.scan.max_recorded_errors,
        })
    }
}

fn single_byte(key: &'static str, value: &str) -> ConfigResult<u8> {
    match value.as_bytes() {
        [b] => Ok(*b),
        _ => Err(ConfigError::Invalid(
            key,
            format!("{:?} is not a single byte", value),
        )),
    }
}

/// Text format settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextConfig {
    #[serde(default = "default_field_delim")]
    pub field_delim: String,

    #[serde(default = "default_line_delim")]
    pub line_delim: String,

    /// Empty for no escaping
    #[serde(default)]
    pub escape_char: String,
}

fn default_field_delim() -> String {
    ",".to_string()
}

fn default_line_delim() -> String {
    "\n".to_string()
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            field_delim: default_field_delim(),
            line_delim: default_line_delim(),
            escape_char: String::new(),
        }
    }
}

/// Code generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodegenConfig {
    /// Use generated write-slot routines
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How generated routines run
    #[serde(default)]
    pub mode: ExecutionMode,
}

fn default_true() -> bool {
    true
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ExecutionMode::Compiled,
        }
    }
}

/// Scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSettings {
    /// Copy strings into the batch pool
    #[serde(default)]
    pub copy_strings: bool,

    /// Fail the scan on the first bad field
    #[serde(default)]
    pub abort_on_error: bool,

    /// Worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_max_recorded_errors")]
    pub max_recorded_errors: usize,
}

fn default_workers() -> usize {
    1
}

fn default_max_recorded_errors() -> usize {
    100
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            copy_strings: false,
            abort_on_error: false,
            workers: default_workers(),
            max_recorded_errors: default_max_recorded_errors(),
        }
    }
}
