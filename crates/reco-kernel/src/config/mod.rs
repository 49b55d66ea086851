//! Configuration loading and change detection.
//!
//! The recommend-config tree is read from a single path at startup and
//! again on reload. Supported formats: YAML, TOML, JSON, INI, RON, JSON5
//! (auto-detected from the file extension), with environment-variable
//! substitution (`${VAR}` and `$VAR` syntax) applied before parsing.
//!
//! Change detection is signature-based: every instance subtree hashes to
//! a deterministic [`signature_of`] value, and reload rebuilds only the
//! instances whose signature changed.

mod model;

pub use model::*;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Configuration error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("duplicate {kind} name: {name}")]
    Duplicate { kind: String, name: String },

    #[error("reference to unknown {kind}: {name}")]
    UnknownReference { kind: String, name: String },

    #[error("{name}: missing {what}")]
    Missing { name: String, what: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Deterministic signature of an instance's configured subtree.
///
/// The subtree is serialized through `serde_json::Value` (whose object
/// keys are ordered), so two structurally equal configurations always
/// hash to the same signature regardless of map iteration order.
pub fn signature_of<T: Serialize>(value: &T) -> ConfigResult<String> {
    let canonical = serde_json::to_value(value)
        .map_err(|e| ConfigError::Serialization(e.to_string()))?
        .to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(feature = "loader")]
mod loader {
    use super::{ConfigError, ConfigResult, RecommendConfig};
    use config::{Config as Cfg, File, FileFormat};
    use regex::Regex;
    use serde::de::DeserializeOwned;
    use std::path::Path;

    /// Detect configuration format from file extension.
    pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                ConfigError::UnsupportedFormat("No file extension found".to_string())
            })?;

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(FileFormat::Yaml),
            "toml" => Ok(FileFormat::Toml),
            "json" => Ok(FileFormat::Json),
            "ini" => Ok(FileFormat::Ini),
            "ron" => Ok(FileFormat::Ron),
            "json5" => Ok(FileFormat::Json5),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    /// Substitute environment variables in a string.
    ///
    /// Supports both `${VAR_NAME}` and `$VAR_NAME` syntax; unresolved
    /// references are left in place.
    pub fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        // Braced syntax first, so `${VAR}` never matches the bare rule.
        let re_braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
        result = re_braced
            .replace_all(&result, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
            })
            .to_string();

        let re_simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").unwrap();
        result = re_simple
            .replace_all(&result, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
            })
            .to_string();

        result
    }

    /// Parse a configuration value from a string with explicit format.
    pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
    where
        T: DeserializeOwned,
    {
        let substituted = substitute_env_vars(content);

        let config = Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    /// Load a configuration value from a file, auto-detecting the format.
    pub fn load_config<T>(path: &str) -> ConfigResult<T>
    where
        T: DeserializeOwned,
    {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        from_str(&content, format)
    }

    /// Load and validate the recommend-config tree from a file.
    ///
    /// This is the startup and reload entry point: a validation failure
    /// here is fatal at startup and leaves the previous configuration in
    /// place on reload.
    pub fn load_recommend_config(path: &str) -> ConfigResult<RecommendConfig> {
        let cfg: RecommendConfig = load_config(path)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(feature = "loader")]
pub use config::FileFormat;
#[cfg(feature = "loader")]
pub use loader::{detect_format, from_str, load_config, load_recommend_config, substitute_env_vars};
