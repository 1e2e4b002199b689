use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON config '{path}': {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported config extension '{ext}'. Use .toml or .json.")]
    UnsupportedExtension { ext: String },
    #[error("Config file must have .toml or .json extension.")]
    MissingExtension,
    #[error("No config found. Pass --config or create loadfleet.toml.")]
    NotFound,
    #[error("Config must define at least one cluster.")]
    NoClusters,
    #[error("Config must define at least one test plan.")]
    NoPlans,
    #[error("Clusters {first} and {second} share the identity '{identity}'.")]
    DuplicateCluster {
        first: usize,
        second: usize,
        identity: String,
    },
    #[error("Test plan '{plan}' is defined more than once.")]
    DuplicatePlan { plan: String },
    #[error("Data center cluster '{title}' must list at least one machine.")]
    NoMachines { title: String },
    #[error("Config '{field}' must be >= 1.")]
    FieldMustBePositive { field: String },
    #[error("Config '{field}' must not be empty.")]
    FieldEmpty { field: String },
    #[error("Invalid duration for '{field}': {message}")]
    InvalidDuration { field: String, message: String },
    #[error("Failed to read plan artifact '{path}': {source}")]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
