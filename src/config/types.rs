use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, ValidationError};

/// Root of a `loadfleet.toml` / `loadfleet.json` file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub code: String,
    /// Directory holding the `.jmx` plans and their data files, relative to
    /// the config file. Defaults to `app`.
    pub app_dir: Option<String>,
    pub master_slave: Option<bool>,
    /// Where result files are collected, relative to the config file.
    pub results_dir: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    pub wait_timeout: Option<DurationValue>,
    pub poll_interval: Option<DurationValue>,
    pub stop_retries: Option<u32>,
    pub stop_retry_interval: Option<DurationValue>,
    pub exit_poll_interval: Option<DurationValue>,
    pub connect_attempts: Option<u32>,
    pub connect_backoff: Option<DurationValue>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanConfig {
    /// Plan path below the application directory, without `.jmx`.
    pub name: String,
    pub loops_forever: Option<bool>,
    pub serialize_thread_groups: Option<bool>,
    /// Extra files uploaded with the plan, relative to the application
    /// directory.
    #[serde(default)]
    pub data_files: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Thread-group size properties, split across the plan's agents.
    #[serde(default)]
    pub threads: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterConfig {
    Cloud(CloudConfig),
    DataCenter(DataCenterConfig),
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudConfig {
    pub account: Option<String>,
    pub region: Option<String>,
    pub instance_type: Option<String>,
    pub max_threads_per_agent: Option<u32>,
    pub user_name: Option<String>,
    pub identity_file: Option<String>,
    pub image: Option<String>,
    pub tool_home: Option<String>,
    pub active: Option<bool>,
    pub code: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataCenterConfig {
    pub title: Option<String>,
    pub user_name: Option<String>,
    pub identity_file: Option<String>,
    #[serde(default)]
    pub machines: Vec<String>,
    pub port: Option<u16>,
    pub tool_home: Option<String>,
    pub active: Option<bool>,
    pub code: Option<String>,
}

/// Either plain seconds or a humanised string such as `"5s"` or `"2m"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self, field: &str) -> Result<Duration, ConfigError> {
        let parsed = match self {
            DurationValue::Seconds(0) => Err(ValidationError::DurationZero),
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => super::parse_duration(text),
        };
        parsed.map_err(|err| ConfigError::InvalidDuration {
            field: field.to_owned(),
            message: err.to_string(),
        })
    }
}
