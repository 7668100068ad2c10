use std::path::Path;

use crate::error::{ConfigError, EngineError, EngineResult};

use super::types::ConfigFile;

/// Loads a TOML or JSON config file; the extension picks the format.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or has an
/// unsupported extension.
pub fn load_config(path: &Path) -> EngineResult<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        EngineError::config(ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|err| {
            EngineError::config(ConfigError::ParseToml {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some("json") => serde_json::from_str(&content).map_err(|err| {
            EngineError::config(ConfigError::ParseJson {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some(ext) => Err(EngineError::config(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        })),
        None => Err(EngineError::config(ConfigError::MissingExtension)),
    }
}
