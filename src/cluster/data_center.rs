//! Agents on machines the operator already owns.
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{AgentPlacement, BackendKind, Clusterable};
use crate::agent::Agent;
use crate::error::{FleetError, FleetResult};
use crate::plan::TestPlanDescriptor;
use crate::remote::{RemoteAccess, RemoteConnector};

pub const DEFAULT_TITLE: &str = "default";
pub const DEFAULT_USER: &str = "ubuntu";
pub const DEFAULT_PORT: u16 = 22;

/// Desired configuration of a data-center cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCenterSpec {
    pub title: String,
    pub user_name: String,
    pub identity_file: Option<PathBuf>,
    pub machines: Vec<String>,
    pub port: u16,
    pub tool_home: Option<String>,
    pub active: bool,
    pub code: Option<String>,
}

impl DataCenterSpec {
    #[must_use]
    pub fn new(title: impl Into<String>, machines: Vec<String>) -> Self {
        Self {
            title: title.into(),
            user_name: DEFAULT_USER.to_owned(),
            identity_file: None,
            machines,
            port: DEFAULT_PORT,
            tool_home: None,
            active: true,
            code: None,
        }
    }

    #[must_use]
    pub fn identity(&self) -> String {
        self.title.clone()
    }
}

pub struct DataCenter {
    spec: DataCenterSpec,
    access: RemoteAccess,
    connector: Arc<dyn RemoteConnector>,
}

impl DataCenter {
    #[must_use]
    pub fn new(spec: DataCenterSpec, connector: Arc<dyn RemoteConnector>) -> Self {
        let mut access = RemoteAccess::new(spec.user_name.clone()).with_port(spec.port);
        if let Some(identity_file) = &spec.identity_file {
            access = access.with_identity_file(identity_file.clone());
        }
        Self {
            spec,
            access,
            connector,
        }
    }

    #[must_use]
    pub fn machines(&self) -> &[String] {
        &self.spec.machines
    }
}

#[async_trait]
impl Clusterable for DataCenter {
    fn kind(&self) -> BackendKind {
        BackendKind::DataCenter
    }

    fn identity(&self) -> String {
        self.spec.identity()
    }

    fn slug(&self) -> String {
        format!("Data Center {}", self.spec.title)
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
        if plan.num_threads() > 1 {
            self.spec.machines.len()
        } else {
            1
        }
    }

    fn placement(&self, plan: &dyn TestPlanDescriptor) -> AgentPlacement {
        let required = self.required_agent_count(plan);
        AgentPlacement::Machines(self.spec.machines.iter().take(required).cloned().collect())
    }

    async fn setup_backend(&mut self, _force: bool) -> FleetResult<()> {
        if self.spec.active {
            info!(
                "Provisioning {} machine(s) in {}...",
                self.spec.machines.len(),
                self.slug()
            );
        }
        Ok(())
    }

    /// Checks access and the plan's load generator install on the agent's
    /// machine. A machine that fails either check is left inactive.
    async fn prepare_new_agent(
        &self,
        agent: &mut Agent,
        plan: &dyn TestPlanDescriptor,
    ) -> FleetResult<()> {
        let checked = self.check_machine(agent, plan.binary_name()).await;
        if checked.is_err() {
            agent.active = false;
        }
        checked
    }
}

impl DataCenter {
    async fn check_machine(&self, agent: &Agent, binary: &str) -> FleetResult<()> {
        let address = agent.address().ok_or_else(|| FleetError::MissingAddress {
            agent: agent.id.clone(),
        })?;
        debug!("Checking access to {}...", address);
        let shell = self.connector.connect(address, &self.access).await?;

        let path = format!("{}/bin/{}", self.tool_home(), binary);
        let output = shell.run(&format!("ls -d {}", path)).await?;
        if !output.success() {
            return Err(FleetError::ToolMissing {
                host: address.to_owned(),
                path,
            });
        }
        Ok(())
    }
}
