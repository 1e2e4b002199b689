//! Agents on cloud instances, launched and reclaimed through a provider.
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{BackendKind, Clusterable, StopOptions};
use crate::agent::Agent;
use crate::error::{AggregatedFailure, DiagnosticContext, FleetError, FleetResult};
use crate::plan::TestPlanDescriptor;
use crate::remote::{RemoteAccess, RemoteConnector};
use crate::settings::OrchestratorSettings;
use crate::support::run_all_unit;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_INSTANCE_TYPE: &str = "m5a.large";
pub const DEFAULT_USER: &str = "ubuntu";

/// Load threads per unit of instance capacity.
const MIN_THREADS_ONE_AGENT: u64 = 10;

/// Relative capacity of each instance family.
const CLASS_FACTORS: &[(&str, u64)] = &[
    ("t2", 2),
    ("t3", 2),
    ("t3a", 2),
    ("m4", 4),
    ("m5", 5),
    ("m5a", 6),
    ("m5ad", 7),
    ("m5d", 8),
    ("m5dn", 9),
    ("m5n", 10),
];
const FALLBACK_CLASS: &str = "t3a";
const FALLBACK_SIZE: &str = "small";

/// Instance sizes in ascending order; each step doubles the capacity.
const SIZES: &[&str] = &[
    "nano", "micro", "small", "medium", "large", "xlarge", "2xlarge", "4xlarge", "8xlarge",
    "10xlarge", "12xlarge", "16xlarge", "24xlarge", "metal",
];

/// Desired configuration of a cloud cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSpec {
    /// Account or credentials profile; part of the cluster identity.
    pub account: String,
    pub region: String,
    pub instance_type: String,
    /// Explicit capacity; computed from the instance type when absent.
    pub max_threads_per_agent: Option<u32>,
    pub user_name: String,
    pub identity_file: Option<PathBuf>,
    pub image: Option<String>,
    pub tool_home: Option<String>,
    pub active: bool,
    pub code: Option<String>,
}

impl CloudSpec {
    #[must_use]
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_owned(),
            max_threads_per_agent: None,
            user_name: DEFAULT_USER.to_owned(),
            identity_file: None,
            image: None,
            tool_home: None,
            active: true,
            code: None,
        }
    }

    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}@{}", self.account, self.region)
    }

    #[must_use]
    pub fn max_threads_per_agent(&self) -> u32 {
        self.max_threads_per_agent
            .unwrap_or_else(|| calc_max_threads_per_instance(&self.instance_type))
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudInstance {
    pub id: String,
    pub state: InstanceState,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub region: String,
    pub instance_type: String,
    pub image: Option<String>,
    /// Name tag for the instance.
    pub name: String,
}

/// Instance control on one cloud account.
///
/// Provider failures are reported as `FleetError::Provider`.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn launch_instance(&self, request: &LaunchRequest) -> FleetResult<CloudInstance>;

    /// `None` when the instance no longer exists.
    async fn describe_instance(&self, instance_id: &str) -> FleetResult<Option<CloudInstance>>;

    async fn start_instance(&self, instance_id: &str) -> FleetResult<()>;

    async fn stop_instance(&self, instance_id: &str) -> FleetResult<()>;

    async fn terminate_instance(&self, instance_id: &str) -> FleetResult<()>;

    /// Whether the provider's reachability checks pass for the instance.
    async fn system_checks_passed(&self, instance_id: &str) -> FleetResult<bool>;
}

pub struct Cloud {
    spec: CloudSpec,
    access: RemoteAccess,
    max_threads: u32,
    provider: Arc<dyn CloudProvider>,
    connector: Arc<dyn RemoteConnector>,
    settings: OrchestratorSettings,
}

impl Cloud {
    #[must_use]
    pub fn new(
        spec: CloudSpec,
        provider: Arc<dyn CloudProvider>,
        connector: Arc<dyn RemoteConnector>,
        settings: OrchestratorSettings,
    ) -> Self {
        let mut access = RemoteAccess::new(spec.user_name.clone());
        if let Some(identity_file) = &spec.identity_file {
            access = access.with_identity_file(identity_file.clone());
        }
        let max_threads = spec.max_threads_per_agent();
        Self {
            spec,
            access,
            max_threads,
            provider,
            connector,
            settings,
        }
    }

    #[must_use]
    pub const fn max_threads_per_agent(&self) -> u32 {
        self.max_threads
    }

    fn diagnostics(&self, instance_id: &str) -> DiagnosticContext {
        DiagnosticContext::new()
            .with("region", self.spec.region.clone())
            .with("instance", instance_id)
    }

    async fn wait_for_state(&self, instance_id: &str, target: InstanceState) -> FleetResult<()> {
        let provider = self.provider.as_ref();
        let description = format!("{} to reach {:?}", instance_id, target);
        self.settings
            .waiter()
            .wait_for(&description, &self.diagnostics(instance_id), move || async move {
                let instance = provider.describe_instance(instance_id).await?;
                Ok(match target {
                    InstanceState::Terminated => instance
                        .is_none_or(|instance| instance.state == InstanceState::Terminated),
                    InstanceState::Pending
                    | InstanceState::Running
                    | InstanceState::Stopping
                    | InstanceState::Stopped
                    | InstanceState::ShuttingDown => {
                        instance.is_some_and(|instance| instance.state == target)
                    }
                })
            })
            .await
    }

    async fn wait_for_system_checks(&self, instance_id: &str) -> FleetResult<()> {
        let provider = self.provider.as_ref();
        let description = format!("system checks on {} to complete", instance_id);
        self.settings
            .waiter()
            .wait_for(&description, &self.diagnostics(instance_id), move || async move {
                provider.system_checks_passed(instance_id).await
            })
            .await
    }

    /// Restarts a stopped instance, or returns `None` when a new one is needed.
    async fn resume_instance(&self, instance_id: &str) -> FleetResult<Option<CloudInstance>> {
        let Some(instance) = self.provider.describe_instance(instance_id).await? else {
            return Ok(None);
        };
        match instance.state {
            InstanceState::Running => Ok(Some(instance)),
            InstanceState::Stopped => {
                info!("Restarting {} in {}...", instance_id, self.spec.region);
                self.provider.start_instance(instance_id).await?;
                self.wait_for_state(instance_id, InstanceState::Running)
                    .await?;
                self.provider.describe_instance(instance_id).await
            }
            InstanceState::Pending => {
                self.wait_for_state(instance_id, InstanceState::Running)
                    .await?;
                self.provider.describe_instance(instance_id).await
            }
            InstanceState::Stopping => {
                self.wait_for_state(instance_id, InstanceState::Stopped)
                    .await?;
                self.provider.start_instance(instance_id).await?;
                self.wait_for_state(instance_id, InstanceState::Running)
                    .await?;
                self.provider.describe_instance(instance_id).await
            }
            InstanceState::ShuttingDown | InstanceState::Terminated => Ok(None),
        }
    }

    /// Launches a fresh instance for `agent`. The instance id is recorded
    /// before waiting, so a failed launch can still be released.
    async fn launch(&self, agent: &mut Agent) -> FleetResult<CloudInstance> {
        info!("Starting new agent in {}...", self.spec.region);
        let request = LaunchRequest {
            region: self.spec.region.clone(),
            instance_type: self.spec.instance_type.clone(),
            image: self.spec.image.clone(),
            name: agent.id.clone(),
        };
        let launched = self.provider.launch_instance(&request).await?;
        agent.instance_id = Some(launched.id.clone());
        self.wait_for_state(&launched.id, InstanceState::Running)
            .await?;
        Ok(self
            .provider
            .describe_instance(&launched.id)
            .await?
            .unwrap_or(launched))
    }
}

#[async_trait]
impl Clusterable for Cloud {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn identity(&self) -> String {
        self.spec.identity()
    }

    fn slug(&self) -> String {
        format!("Cloud {} ({})", self.spec.region, self.spec.instance_type)
    }

    fn is_active(&self) -> bool {
        self.spec.active
    }

    fn set_active(&mut self, active: bool) {
        self.spec.active = active;
    }

    fn remote_access(&self) -> &RemoteAccess {
        &self.access
    }

    fn tool_home(&self) -> String {
        self.spec
            .tool_home
            .clone()
            .unwrap_or_else(|| format!("{}/jmeter", self.access.user_home()))
    }

    fn required_agent_count(&self, plan: &dyn TestPlanDescriptor) -> usize {
        let threads = plan.num_threads();
        let count = if threads > self.max_threads {
            threads.div_ceil(self.max_threads)
        } else {
            1
        };
        usize::try_from(count).unwrap_or(usize::MAX)
    }

    async fn prepare_new_agent(
        &self,
        agent: &mut Agent,
        _plan: &dyn TestPlanDescriptor,
    ) -> FleetResult<()> {
        let started = self.start_agent(agent).await;
        if started.is_err()
            && let Some(instance_id) = agent.instance_id.take()
        {
            warn!("Releasing {} after a failed launch", instance_id);
            if let Err(err) = self.provider.terminate_instance(&instance_id).await {
                warn!("Could not release {}: {}", instance_id, err);
            }
            agent.clear_addresses();
        }
        started
    }

    async fn start_agent(&self, agent: &mut Agent) -> FleetResult<()> {
        if agent.address().is_some() && agent.instance_id.is_some() {
            return Ok(());
        }

        let resumed = match agent.instance_id.as_deref() {
            Some(instance_id) => self.resume_instance(instance_id).await?,
            None => None,
        };
        let instance = match resumed {
            Some(instance) => instance,
            None => self.launch(agent).await?,
        };
        agent.public_address = instance.public_address;
        agent.private_address = instance.private_address;

        info!("{} is running, waiting for system checks...", instance.id);
        self.wait_for_system_checks(&instance.id).await?;

        info!("{} passed system checks, ensuring remote access...", instance.id);
        let address = agent
            .address()
            .ok_or_else(|| FleetError::MissingAddress {
                agent: agent.id.clone(),
            })?;
        self.connector.connect(address, &self.access).await?;
        Ok(())
    }

    async fn stop_agent(&self, agent: &mut Agent) -> FleetResult<()> {
        let Some(instance_id) = agent.instance_id.as_deref() else {
            warn!("Could not stop {}: no instance is recorded", agent.id);
            return Ok(());
        };
        let running = self
            .provider
            .describe_instance(instance_id)
            .await?
            .is_some_and(|instance| instance.state == InstanceState::Running);
        if running {
            info!("Stopping {}...", instance_id);
            self.provider.stop_instance(instance_id).await?;
            self.wait_for_state(instance_id, InstanceState::Stopped)
                .await?;
        }
        Ok(())
    }

    async fn before_destroy_agent(&self, agent: &mut Agent) -> FleetResult<()> {
        let Some(instance_id) = agent.instance_id.clone() else {
            return Ok(());
        };
        if self.provider.describe_instance(&instance_id).await?.is_some() {
            info!("Terminating {}...", instance_id);
            self.provider.terminate_instance(&instance_id).await?;
            self.wait_for_state(&instance_id, InstanceState::Terminated)
                .await?;
        } else {
            warn!("{} no longer exists in {}", instance_id, self.spec.region);
        }
        agent.instance_id = None;
        agent.clear_addresses();
        Ok(())
    }

    async fn after_stop_load_generation(
        &self,
        agents: &mut [Agent],
        options: StopOptions,
    ) -> FleetResult<()> {
        if !options.suspend {
            return Ok(());
        }
        fn is_suspendable(agent: &&mut Agent) -> bool {
            agent.active && agent.address().is_some()
        }
        let suspended = agents
            .iter_mut()
            .filter(is_suspendable);
        run_all_unit(suspended, |agent| async move {
            self.stop_agent(agent).await?;
            debug!("Suspended {}", agent.id);
            agent.clear_addresses();
            Ok(())
        })
        .await
        .map_err(AggregatedFailure::into_error)
    }
}

/// Default load threads one instance of `instance_type` can drive.
///
/// Capacity is the family factor times a size factor that doubles per size
/// step (`large` is 4x `small`), times ten threads, rounded to a multiple of
/// 5, 10 or 50 depending on magnitude. Unknown families count as `t3a`,
/// unknown sizes as `nano`.
#[must_use]
pub fn calc_max_threads_per_instance(instance_type: &str) -> u32 {
    let (class, size) = instance_type
        .split_once('.')
        .unwrap_or((instance_type, FALLBACK_SIZE));
    let factor_of = |name: &str| {
        CLASS_FACTORS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, factor)| *factor)
    };
    let class_factor = factor_of(class)
        .or_else(|| factor_of(FALLBACK_CLASS))
        .unwrap_or(2);
    let size_index = SIZES
        .iter()
        .position(|candidate| *candidate == size)
        .and_then(|index| u32::try_from(index).ok())
        .unwrap_or(0);

    // Four times the exact capacity, so the `small` baseline stays integral.
    let scaled = class_factor
        .saturating_mul(MIN_THREADS_ONE_AGENT)
        .saturating_mul(2_u64.saturating_pow(size_index));
    let pivot: u64 = if scaled <= 40 {
        5
    } else if scaled <= 200 {
        10
    } else {
        50
    };
    let divisor = pivot.saturating_mul(4);
    let rounded = scaled
        .saturating_mul(2)
        .saturating_add(divisor)
        .checked_div(divisor.saturating_mul(2))
        .unwrap_or(0)
        .saturating_mul(pivot);
    u32::try_from(rounded).unwrap_or(u32::MAX).max(1)
}
