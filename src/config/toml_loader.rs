//! TOML file loading.
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::ConfigError;

/// Load a TOML file, falling back to `T`'s empty-document form when the file
/// does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return parse("", path);
    }
    load_required(path)
}

/// Load a TOML file that must exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_required<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&content, path)
}

/// Parse TOML text, attributing failures to `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] with the parser's message.
pub fn parse<T: DeserializeOwned>(content: &str, path: &Path) -> Result<T, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.message().to_string(),
    })
}
