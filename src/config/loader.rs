use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult, ConfigError};

use super::types::FleetConfig;

const DEFAULT_TOML: &str = "loadfleet.toml";
const DEFAULT_JSON: &str = "loadfleet.json";

/// A parsed config together with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: FleetConfig,
}

impl LoadedConfig {
    /// Directory that relative paths in the config are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            Some(_) | None => PathBuf::from("."),
        }
    }
}

/// Loads a configuration file from the provided path or default locations.
///
/// # Errors
///
/// Returns an error when no config exists or it cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> AppResult<LoadedConfig> {
    let path = match path {
        Some(path) => PathBuf::from(path),
        None => [DEFAULT_TOML, DEFAULT_JSON]
            .into_iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists())
            .ok_or_else(|| AppError::config(ConfigError::NotFound))?,
    };
    let config = load_config_file(&path)?;
    Ok(LoadedConfig { path, config })
}

pub(crate) fn load_config_file(path: &Path) -> AppResult<FleetConfig> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseToml {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some("json") => serde_json::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseJson {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some(ext) => Err(AppError::config(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        })),
        None => Err(AppError::config(ConfigError::MissingExtension)),
    }
}
