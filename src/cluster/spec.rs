use std::sync::Arc;

use super::cloud::{Cloud, CloudProvider, CloudSpec};
use super::data_center::{DataCenter, DataCenterSpec};
use super::{BackendKind, Clusterable};
use crate::error::{FleetError, FleetResult};
use crate::remote::RemoteConnector;
use crate::settings::OrchestratorSettings;

/// Desired configuration of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterSpec {
    Cloud(CloudSpec),
    DataCenter(DataCenterSpec),
}

impl ClusterSpec {
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            ClusterSpec::Cloud(_) => BackendKind::Cloud,
            ClusterSpec::DataCenter(_) => BackendKind::DataCenter,
        }
    }

    /// Key that must be unique among the clusters of one project.
    #[must_use]
    pub fn identity(&self) -> String {
        match self {
            ClusterSpec::Cloud(spec) => spec.identity(),
            ClusterSpec::DataCenter(spec) => spec.identity(),
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        match self {
            ClusterSpec::Cloud(spec) => spec.active,
            ClusterSpec::DataCenter(spec) => spec.active,
        }
    }

    /// Preferred cluster code, if the configuration pins one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            ClusterSpec::Cloud(spec) => spec.code.as_deref(),
            ClusterSpec::DataCenter(spec) => spec.code.as_deref(),
        }
    }
}

/// Turns a desired cluster configuration into a live backend.
pub trait BackendFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the backend cannot be built here, for example a
    /// cloud cluster without a provider.
    fn build(&self, spec: &ClusterSpec) -> FleetResult<Box<dyn Clusterable>>;
}

/// Builds the stock data-center and cloud backends.
pub struct StandardBackends {
    connector: Arc<dyn RemoteConnector>,
    settings: OrchestratorSettings,
    provider: Option<Arc<dyn CloudProvider>>,
}

impl StandardBackends {
    #[must_use]
    pub fn new(connector: Arc<dyn RemoteConnector>, settings: OrchestratorSettings) -> Self {
        Self {
            connector,
            settings,
            provider: None,
        }
    }

    #[must_use]
    pub fn with_cloud_provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.provider = Some(provider);
        self
    }
}

impl BackendFactory for StandardBackends {
    fn build(&self, spec: &ClusterSpec) -> FleetResult<Box<dyn Clusterable>> {
        match spec {
            ClusterSpec::DataCenter(spec) => Ok(Box::new(DataCenter::new(
                spec.clone(),
                Arc::clone(&self.connector),
            ))),
            ClusterSpec::Cloud(spec) => {
                let provider = self.provider.as_ref().ok_or_else(|| {
                    FleetError::UnsupportedBackend {
                        cluster: spec.identity(),
                        backend: BackendKind::Cloud.as_str(),
                        reason: "no cloud provider is configured".to_owned(),
                    }
                })?;
                Ok(Box::new(Cloud::new(
                    spec.clone(),
                    Arc::clone(provider),
                    Arc::clone(&self.connector),
                    self.settings,
                )))
            }
        }
    }
}
