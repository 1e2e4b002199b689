use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::{
    CloudConfig, ClusterConfig, DataCenterConfig, FleetConfig, PlanConfig, SettingsConfig,
};
use crate::cluster::ClusterSpec;
use crate::cluster::cloud::{self, CloudSpec};
use crate::cluster::data_center::{self, DataCenterSpec};
use crate::error::ConfigError;
use crate::plan::TestPlan;
use crate::settings::OrchestratorSettings;

const DEFAULT_APP_DIR: &str = "app";
const DEFAULT_RESULTS_DIR: &str = "results";
const DEFAULT_ACCOUNT: &str = "default";

/// A validated config, with every relative path resolved.
#[derive(Debug, Clone)]
pub struct FleetSetup {
    pub project: String,
    pub master_slave: bool,
    pub app_dir: PathBuf,
    pub results_dir: PathBuf,
    pub settings: OrchestratorSettings,
    pub clusters: Vec<ClusterSpec>,
    plans: Vec<PlanConfig>,
}

impl FleetSetup {
    #[must_use]
    pub fn plan_names(&self) -> impl Iterator<Item = &str> {
        self.plans.iter().map(|plan| plan.name.as_str())
    }

    /// Reads every plan and checks that its data files exist.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadArtifact` for a missing plan or data file.
    pub fn load_plans(&self) -> Result<Vec<TestPlan>, ConfigError> {
        self.plans
            .iter()
            .map(|config| self.load_plan(config))
            .collect()
    }

    fn load_plan(&self, config: &PlanConfig) -> Result<TestPlan, ConfigError> {
        let mut plan = TestPlan::load(&self.project, &config.name, &self.app_dir)?
            .looping(config.loops_forever.unwrap_or(false))
            .serialize_thread_groups(config.serialize_thread_groups.unwrap_or(false));
        for relative in &config.data_files {
            let local = self.app_dir.join(relative);
            std::fs::metadata(&local).map_err(|source| ConfigError::ReadArtifact {
                path: local.clone(),
                source,
            })?;
            plan = plan.with_artifact(local, relative);
        }
        for (name, value) in &config.properties {
            plan = plan.with_property(name, value);
        }
        for (name, threads) in &config.threads {
            plan = plan.with_thread_property(name, *threads);
        }
        debug!("Loaded plan {}", config.name);
        Ok(plan)
    }
}

/// Validates `config` and resolves its paths against `base_dir`.
///
/// # Errors
///
/// Returns the first validation problem found.
pub fn apply_config(config: &FleetConfig, base_dir: &Path) -> Result<FleetSetup, ConfigError> {
    let project = config.project.code.trim();
    if project.is_empty() {
        return Err(ConfigError::FieldEmpty {
            field: "project.code".to_owned(),
        });
    }
    validate_plans(&config.plans)?;
    let clusters = cluster_specs(&config.clusters, base_dir)?;
    let settings = apply_settings(&config.settings)?;

    let app_dir = config.project.app_dir.as_deref().unwrap_or(DEFAULT_APP_DIR);
    let results_dir = config
        .project
        .results_dir
        .as_deref()
        .unwrap_or(DEFAULT_RESULTS_DIR);
    Ok(FleetSetup {
        project: project.to_owned(),
        master_slave: config.project.master_slave.unwrap_or(false),
        app_dir: base_dir.join(app_dir),
        results_dir: base_dir.join(results_dir),
        settings,
        clusters,
        plans: config.plans.clone(),
    })
}

fn validate_plans(plans: &[PlanConfig]) -> Result<(), ConfigError> {
    if plans.is_empty() {
        return Err(ConfigError::NoPlans);
    }
    for (index, plan) in plans.iter().enumerate() {
        if plan.name.trim().is_empty() {
            return Err(ConfigError::FieldEmpty {
                field: format!("plans[{}].name", index),
            });
        }
        if plans
            .iter()
            .take(index)
            .any(|earlier| earlier.name == plan.name)
        {
            return Err(ConfigError::DuplicatePlan {
                plan: plan.name.clone(),
            });
        }
        if let Some((name, _)) = plan.threads.iter().find(|(_, threads)| **threads == 0) {
            return Err(ConfigError::FieldMustBePositive {
                field: format!("plans[{}].threads.{}", index, name),
            });
        }
    }
    Ok(())
}

fn cluster_specs(configs: &[ClusterConfig], base_dir: &Path) -> Result<Vec<ClusterSpec>, ConfigError> {
    if configs.is_empty() {
        return Err(ConfigError::NoClusters);
    }
    let mut specs: Vec<ClusterSpec> = Vec::with_capacity(configs.len());
    for (index, config) in configs.iter().enumerate() {
        let spec = match config {
            ClusterConfig::Cloud(cloud) => ClusterSpec::Cloud(cloud_spec(cloud, index, base_dir)?),
            ClusterConfig::DataCenter(site) => {
                ClusterSpec::DataCenter(data_center_spec(site, base_dir)?)
            }
        };
        let identity = spec.identity();
        if let Some(first) = specs
            .iter()
            .position(|seen| seen.kind() == spec.kind() && seen.identity() == identity)
        {
            return Err(ConfigError::DuplicateCluster {
                first,
                second: index,
                identity,
            });
        }
        specs.push(spec);
    }
    Ok(specs)
}

fn cloud_spec(config: &CloudConfig, index: usize, base_dir: &Path) -> Result<CloudSpec, ConfigError> {
    if config.max_threads_per_agent == Some(0) {
        return Err(ConfigError::FieldMustBePositive {
            field: format!("clusters[{}].max_threads_per_agent", index),
        });
    }
    let mut spec = CloudSpec::new(
        config.account.as_deref().unwrap_or(DEFAULT_ACCOUNT),
        config.region.as_deref().unwrap_or(cloud::DEFAULT_REGION),
    );
    if let Some(instance_type) = &config.instance_type {
        spec.instance_type.clone_from(instance_type);
    }
    if let Some(user_name) = &config.user_name {
        spec.user_name.clone_from(user_name);
    }
    spec.max_threads_per_agent = config.max_threads_per_agent;
    spec.identity_file = config.identity_file.as_ref().map(|path| base_dir.join(path));
    spec.image.clone_from(&config.image);
    spec.tool_home.clone_from(&config.tool_home);
    spec.active = config.active.unwrap_or(true);
    spec.code.clone_from(&config.code);
    Ok(spec)
}

fn data_center_spec(config: &DataCenterConfig, base_dir: &Path) -> Result<DataCenterSpec, ConfigError> {
    let title = config
        .title
        .as_deref()
        .unwrap_or(data_center::DEFAULT_TITLE);
    let machines: Vec<String> = config
        .machines
        .iter()
        .map(|machine| machine.trim().to_owned())
        .filter(|machine| !machine.is_empty())
        .collect();
    if machines.is_empty() {
        return Err(ConfigError::NoMachines {
            title: title.to_owned(),
        });
    }
    let mut spec = DataCenterSpec::new(title, machines);
    if let Some(user_name) = &config.user_name {
        spec.user_name.clone_from(user_name);
    }
    if let Some(port) = config.port {
        spec.port = port;
    }
    spec.identity_file = config.identity_file.as_ref().map(|path| base_dir.join(path));
    spec.tool_home.clone_from(&config.tool_home);
    spec.active = config.active.unwrap_or(true);
    spec.code.clone_from(&config.code);
    Ok(spec)
}

fn apply_settings(config: &SettingsConfig) -> Result<OrchestratorSettings, ConfigError> {
    let mut settings = OrchestratorSettings::default();
    let durations = [
        ("settings.wait_timeout", &config.wait_timeout, &mut settings.wait_timeout),
        ("settings.poll_interval", &config.poll_interval, &mut settings.poll_interval),
        (
            "settings.stop_retry_interval",
            &config.stop_retry_interval,
            &mut settings.stop_retry_interval,
        ),
        (
            "settings.exit_poll_interval",
            &config.exit_poll_interval,
            &mut settings.exit_poll_interval,
        ),
        (
            "settings.connect_backoff",
            &config.connect_backoff,
            &mut settings.connect_backoff,
        ),
    ];
    for (field, value, target) in durations {
        if let Some(value) = value {
            *target = value.to_duration(field)?;
        }
    }
    if let Some(retries) = config.stop_retries {
        settings.stop_retries = retries;
    }
    if let Some(attempts) = config.connect_attempts {
        if attempts == 0 {
            return Err(ConfigError::FieldMustBePositive {
                field: "settings.connect_attempts".to_owned(),
            });
        }
        settings.connect_attempts = attempts;
    }
    Ok(settings)
}
