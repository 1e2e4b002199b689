//! Backends that host agents, and the coordinator that drives them.
pub mod cloud;
mod code;
pub mod coordinator;
pub mod data_center;
mod lifecycle;
mod provision;
mod results;
mod spec;


use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::Agent;
use crate::error::{AggregatedFailure, FleetError, FleetResult};
use crate::plan::TestPlanDescriptor;
use crate::remote::{RemoteAccess, RemoteConnector};
use crate::settings::OrchestratorSettings;
use crate::support::run_all_unit;

pub use code::generate_code;
pub use coordinator::{ClusterCoordinator, ExecutionStatus, StopReport};
pub use lifecycle::{Cluster, ClusterState, ClusterStopOutcome, RunningAgent};
pub use results::{RemoteResultCollector, ResultCollector};
pub use spec::{BackendFactory, ClusterSpec, StandardBackends};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Cloud,
    DataCenter,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BackendKind::Cloud => "cloud",
            BackendKind::DataCenter => "data_center",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many agents one plan and role should have on a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentPlacement {
    /// Interchangeable agents, created on demand.
    Count(usize),
    /// One agent per listed machine address.
    Machines(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Release backend capacity (stop instances) once the test has stopped.
    pub suspend: bool,
}

/// Project-wide collaborators shared by every cluster operation.
#[derive(Clone, Copy)]
pub struct FleetEnv<'env> {
    pub connector: &'env dyn RemoteConnector,
    pub settings: &'env OrchestratorSettings,
    pub plans: &'env [Arc<dyn TestPlanDescriptor>],
    pub master_slave: bool,
}

impl<'env> FleetEnv<'env> {
    /// # Errors
    ///
    /// Returns `FleetError::UnknownPlan` when no plan has the id.
    pub fn plan(&self, plan_id: &str) -> FleetResult<&'env dyn TestPlanDescriptor> {
        self.plans
            .iter()
            .find(|plan| plan.id() == plan_id)
            .map(AsRef::as_ref)
            .ok_or_else(|| FleetError::UnknownPlan {
                plan: plan_id.to_owned(),
            })
    }
}

/// A backend that owns a pool of agents.
///
/// The agent inventory itself lives in the `Cluster`; hooks receive the
/// agents they act on. Every hook except `setup_backend` and `cleanup` takes
/// `&self` so agents can be driven concurrently.
#[async_trait]
pub trait Clusterable: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Attributes that make this backend unique within a project.
    fn identity(&self) -> String;

    /// Human-readable description for logs and reports.
    fn slug(&self) -> String;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    fn remote_access(&self) -> &RemoteAccess;

    /// Directory holding the load generator on every agent.
    fn tool_home(&self) -> String {
        format!("{}/jmeter", self.remote_access().user_home())
    }

    /// Agents needed to run `plan`.
    fn required_agent_count(&self, plan: &dyn TestPlanDescriptor) -> usize;

    fn placement(&self, plan: &dyn TestPlanDescriptor) -> AgentPlacement {
        AgentPlacement::Count(self.required_agent_count(plan))
    }

    /// Backend-wide preparation before agents are provisioned.
    async fn setup_backend(&mut self, _force: bool) -> FleetResult<()> {
        Ok(())
    }

    /// Brings a newly created agent for `plan` to a usable state. An error
    /// keeps the agent out of the inventory.
    async fn prepare_new_agent(
        &self,
        agent: &mut Agent,
        plan: &dyn TestPlanDescriptor,
    ) -> FleetResult<()>;

    /// Ensures the agent's backend resource is up and its addresses are set.
    async fn start_agent(&self, _agent: &mut Agent) -> FleetResult<()> {
        Ok(())
    }

    /// Releases the agent's backend resource without destroying it.
    async fn stop_agent(&self, _agent: &mut Agent) -> FleetResult<()> {
        Ok(())
    }

    async fn before_destroy_agent(&self, _agent: &mut Agent) -> FleetResult<()> {
        Ok(())
    }

    async fn after_destroy_agent(&self, _agent: &Agent) -> FleetResult<()> {
        Ok(())
    }

    /// Starts every active agent that has no address yet.
    async fn before_generate_load(&self, agents: &mut [Agent]) -> FleetResult<()> {
        fn is_pending(agent: &&mut Agent) -> bool {
            agent.active && agent.address().is_none()
        }
        let pending = agents
            .iter_mut()
            .filter(is_pending);
        run_all_unit(pending, |agent| self.start_agent(agent))
            .await
            .map_err(AggregatedFailure::into_error)
    }

    async fn after_generate_load(&self, _agents: &[Agent]) -> FleetResult<()> {
        Ok(())
    }

    async fn before_stop_load_generation(&self, _agents: &[Agent]) -> FleetResult<()> {
        Ok(())
    }

    async fn after_stop_load_generation(
        &self,
        _agents: &mut [Agent],
        _options: StopOptions,
    ) -> FleetResult<()> {
        Ok(())
    }

    /// Backend-wide teardown once every agent has been destroyed.
    async fn cleanup(&mut self) -> FleetResult<()> {
        Ok(())
    }
}
