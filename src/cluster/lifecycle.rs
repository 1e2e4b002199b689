use std::collections::{HashMap, HashSet};

use tracing::{Instrument, Level, Span, debug, info, span};

use super::{BackendKind, Clusterable, FleetEnv, ResultCollector, StopOptions};
use crate::agent::{Agent, AgentContext, AgentRole, StopOutcome};
use crate::error::{AggregatedFailure, FleetError, FleetResult};
use crate::plan::TestPlanDescriptor;
use crate::support::{run_all, run_all_unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Unconfigured,
    Configuring,
    Active,
    GeneratingLoad,
    Stopping,
    Terminated,
}

/// How one cluster answered a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStopOutcome {
    Stopped,
    /// A master is still running its test; nothing was stopped further.
    Refused,
}

/// A master agent whose load generator is still alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningAgent {
    pub cluster: String,
    pub agent_id: String,
    pub plan_id: String,
    pub address: String,
    pub process_id: u32,
}

/// One configured backend and the agents it hosts.
pub struct Cluster {
    pub(super) code: String,
    pub(super) backend: Box<dyn Clusterable>,
    pub(super) agents: Vec<Agent>,
    pub(super) state: ClusterState,
    pub(super) span: Span,
    pub(super) next_agent_seq: u32,
}

impl Cluster {
    #[must_use]
    pub fn new(code: impl Into<String>, backend: Box<dyn Clusterable>) -> Self {
        let code = code.into();
        let span = span!(
            Level::INFO,
            "cluster",
            code = %code,
            backend = %backend.kind()
        );
        Self {
            code,
            backend,
            agents: Vec::new(),
            state: ClusterState::Unconfigured,
            span,
            next_agent_seq: 0,
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    #[must_use]
    pub fn backend(&self) -> &dyn Clusterable {
        self.backend.as_ref()
    }

    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    #[must_use]
    pub const fn state(&self) -> ClusterState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.backend.is_active()
    }

    pub(super) fn replace_backend(&mut self, backend: Box<dyn Clusterable>) -> Box<dyn Clusterable> {
        std::mem::replace(&mut self.backend, backend)
    }

    /// Marks the backend and every agent inactive.
    pub fn deactivate(&mut self) {
        self.backend.set_active(false);
        for agent in &mut self.agents {
            agent.active = false;
        }
    }

    pub(super) fn next_agent(&mut self, role: AgentRole, plan_id: &str) -> Agent {
        self.next_agent_seq = self.next_agent_seq.saturating_add(1);
        let id = format!("{}-{}-{}", self.code, role, self.next_agent_seq);
        Agent::new(id, role, plan_id)
    }

    /// Prepares the backend and provisions agents for every plan.
    ///
    /// Agents bound to plans that no longer exist are deactivated. An
    /// inactive backend is only provisioned when `force` is set.
    ///
    /// # Errors
    ///
    /// Returns the first provisioning failure; the cluster is left
    /// `Unconfigured`.
    pub async fn setup(&mut self, env: FleetEnv<'_>, force: bool) -> FleetResult<()> {
        self.state = ClusterState::Configuring;
        let span = self.span.clone();
        let result = self.configure(env, force).instrument(span).await;
        self.state = if result.is_ok() {
            ClusterState::Active
        } else {
            ClusterState::Unconfigured
        };
        result
    }

    async fn configure(&mut self, env: FleetEnv<'_>, force: bool) -> FleetResult<()> {
        debug!("Setting up {}", self.backend.slug());
        self.backend.setup_backend(force).await?;
        for agent in &mut self.agents {
            if env.plan(&agent.plan_id).is_err() {
                agent.active = false;
            }
        }
        if !(self.backend.is_active() || force) {
            return Ok(());
        }
        for plan in env.plans {
            self.provision_plan(plan.as_ref(), env.master_slave).await?;
        }
        Ok(())
    }

    /// Starts the backend resources, then every slave, then every master.
    ///
    /// A master only starts after every slave start returned, so it can be
    /// handed the slaves' addresses.
    ///
    /// # Errors
    ///
    /// Returns the backend hook error or the aggregated agent start failures.
    pub async fn generate_load(&mut self, env: FleetEnv<'_>, redeploy: bool) -> FleetResult<()> {
        self.state = ClusterState::GeneratingLoad;
        let span = self.span.clone();
        self.start_agents(env, redeploy).instrument(span).await
    }

    async fn start_agents(&mut self, env: FleetEnv<'_>, redeploy: bool) -> FleetResult<()> {
        info!("Starting load generation on {}...", self.backend.slug());
        let counts = self.load_agent_counts(env.master_slave);
        let Cluster {
            backend, agents, ..
        } = &mut *self;
        let backend: &dyn Clusterable = backend.as_ref();
        backend.before_generate_load(agents).await?;

        let tool_home = backend.tool_home();
        let tool_home = tool_home.as_str();
        let counts = &counts;
        if env.master_slave {
            let slaves = agents
                .iter_mut()
                .filter(|agent| agent.active && agent.role == AgentRole::Slave);
            run_all_unit(slaves, move |agent| {
                let span = agent_span(agent);
                async move {
                    let plan = env.plan(&agent.plan_id)?;
                    let ctx = agent_context(env, backend, tool_home, plan, counts);
                    agent.upload_artifacts_if_needed(&ctx, redeploy).await?;
                    agent.start(&ctx, &[]).await
                }
                .instrument(span)
            })
            .await
            .map_err(AggregatedFailure::into_error)?;
        }

        let peers = slave_addresses(agents);
        let peers = &peers;
        let masters = agents
            .iter_mut()
            .filter(|agent| agent.active && agent.is_master());
        run_all_unit(masters, move |agent| {
            let span = agent_span(agent);
            async move {
                let plan = env.plan(&agent.plan_id)?;
                let ctx = agent_context(env, backend, tool_home, plan, counts);
                agent.upload_artifacts_if_needed(&ctx, redeploy).await?;
                let slaves = peers.get(&agent.plan_id).map_or(&[][..], Vec::as_slice);
                agent.start(&ctx, slaves).await
            }
            .instrument(span)
        })
        .await
        .map_err(AggregatedFailure::into_error)?;

        backend.after_generate_load(agents).await
    }

    /// Stops every master, then the slaves of masters that stopped.
    ///
    /// When any master refuses (its test is still running and neither `wait`
    /// nor `aborted` was given) the cluster reports `Refused`, and results are
    /// neither collected nor is the after-stop hook invoked. Results are
    /// collected unless `aborted`.
    ///
    /// A master that fails to stop ends the sequence: no slave is stopped,
    /// nothing is collected and the cluster keeps generating load until a
    /// later stop succeeds.
    ///
    /// # Errors
    ///
    /// Returns backend hook, collector, or aggregated agent failures.
    pub async fn stop_load_generation(
        &mut self,
        env: FleetEnv<'_>,
        wait: bool,
        aborted: bool,
        options: StopOptions,
        collector: Option<&dyn ResultCollector>,
    ) -> FleetResult<ClusterStopOutcome> {
        self.state = ClusterState::Stopping;
        let span = self.span.clone();
        let outcome = self
            .stop_agents(env, wait, aborted, options, collector)
            .instrument(span)
            .await;
        self.state = match outcome {
            Ok(ClusterStopOutcome::Stopped) => ClusterState::Active,
            Ok(ClusterStopOutcome::Refused) | Err(_) => ClusterState::GeneratingLoad,
        };
        outcome
    }

    async fn stop_agents(
        &mut self,
        env: FleetEnv<'_>,
        wait: bool,
        aborted: bool,
        options: StopOptions,
        collector: Option<&dyn ResultCollector>,
    ) -> FleetResult<ClusterStopOutcome> {
        info!("Stopping load generation on {}...", self.backend.slug());
        let counts = self.load_agent_counts(env.master_slave);
        let counts = &counts;
        let Cluster {
            backend, agents, ..
        } = &mut *self;
        let backend: &dyn Clusterable = backend.as_ref();
        backend.before_stop_load_generation(agents).await?;

        let tool_home = backend.tool_home();
        let tool_home = tool_home.as_str();
        let masters = agents
            .iter_mut()
            .filter(|agent| agent.active && agent.is_master());
        let outcomes = run_all(masters, move |agent| {
            let span = agent_span(agent);
            async move {
                let plan = env.plan(&agent.plan_id)?;
                let ctx = agent_context(env, backend, tool_home, plan, counts);
                let outcome = agent.stop(&ctx, wait, aborted).await?;
                Ok((agent.plan_id.clone(), outcome))
            }
            .instrument(span)
        })
        .await
        .map_err(AggregatedFailure::into_error)?;

        let refused: HashSet<String> = outcomes
            .into_iter()
            .filter(|(_, outcome)| outcome.is_refused())
            .map(|(plan_id, _)| plan_id)
            .collect();

        if env.master_slave {
            let refused = &refused;
            let slaves = agents.iter_mut().filter(|agent| {
                agent.active && agent.role == AgentRole::Slave && !refused.contains(&agent.plan_id)
            });
            run_all_unit(slaves, move |agent| {
                let span = agent_span(agent);
                async move {
                    let plan = env.plan(&agent.plan_id)?;
                    let ctx = agent_context(env, backend, tool_home, plan, counts);
                    agent.stop(&ctx, wait, aborted).await.map(|_: StopOutcome| ())
                }
                .instrument(span)
            })
            .await
            .map_err(AggregatedFailure::into_error)?;
        }

        if !refused.is_empty() {
            info!("{} is still running {} plan(s)", self.code, refused.len());
            return Ok(ClusterStopOutcome::Refused);
        }

        if !aborted && let Some(collector) = collector {
            collector.collect(env, &*self).await?;
        }
        let Cluster {
            backend, agents, ..
        } = &mut *self;
        backend.after_stop_load_generation(agents, options).await?;
        Ok(ClusterStopOutcome::Stopped)
    }

    /// Active masters whose load generator is still alive. Read-only.
    ///
    /// # Errors
    ///
    /// Returns the aggregated liveness query failures.
    pub async fn check_status(&self, env: FleetEnv<'_>) -> FleetResult<Vec<RunningAgent>> {
        let counts = self.load_agent_counts(env.master_slave);
        let counts = &counts;
        let backend = self.backend.as_ref();
        let tool_home = backend.tool_home();
        let tool_home = tool_home.as_str();
        let code = self.code.as_str();
        let candidates = self
            .agents
            .iter()
            .filter(|agent| agent.active && agent.is_master() && agent.process_id.is_some());
        let running = run_all(candidates, move |agent| async move {
            let plan = env.plan(&agent.plan_id)?;
            let ctx = agent_context(env, backend, tool_home, plan, counts);
            if !agent.check_running(&ctx).await? {
                return Ok(None);
            }
            Ok(Some(RunningAgent {
                cluster: code.to_owned(),
                agent_id: agent.id.clone(),
                plan_id: agent.plan_id.clone(),
                address: agent.address().unwrap_or_default().to_owned(),
                process_id: agent.process_id.unwrap_or_default(),
            }))
        })
        .instrument(self.span.clone())
        .await
        .map_err(AggregatedFailure::into_error)?;
        Ok(running.into_iter().flatten().collect())
    }

    /// Destroys every agent, then tears the backend down.
    ///
    /// Every agent gets its destroy hooks even when a sibling fails. Agents
    /// that were destroyed leave the inventory; the backend cleanup only runs
    /// once none is left.
    ///
    /// # Errors
    ///
    /// Returns the aggregated destroy failures, or the cleanup failure.
    pub async fn terminate(&mut self) -> FleetResult<()> {
        let span = self.span.clone();
        self.destroy_all().instrument(span).await?;
        self.state = ClusterState::Terminated;
        Ok(())
    }

    async fn destroy_all(&mut self) -> FleetResult<()> {
        info!("Terminating {}...", self.backend.slug());
        let Cluster {
            backend, agents, ..
        } = &mut *self;
        let backend: &dyn Clusterable = backend.as_ref();
        let outcomes = run_all(agents.iter_mut(), move |agent| {
            let span = agent_span(agent);
            async move {
                let destroyed = destroy_agent(backend, agent).await;
                Ok::<_, FleetError>((agent.id.clone(), destroyed))
            }
            .instrument(span)
        })
        .await
        .map_err(AggregatedFailure::into_error)?;

        let mut failures = AggregatedFailure::default();
        let mut destroyed = HashSet::new();
        for (agent_id, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    destroyed.insert(agent_id);
                }
                Err(err) => failures.push(err),
            }
        }
        agents.retain(|agent| !destroyed.contains(&agent.id));
        if !failures.is_empty() {
            return Err(failures.into_error());
        }

        self.backend.cleanup().await
    }

    /// Agents sharing each plan's threads: masters in flat topology, slaves
    /// in master/slave topology.
    fn load_agent_counts(&self, master_slave: bool) -> HashMap<String, u32> {
        let load_role = if master_slave {
            AgentRole::Slave
        } else {
            AgentRole::Master
        };
        let mut counts: HashMap<String, u32> = HashMap::new();
        for agent in self
            .agents
            .iter()
            .filter(|agent| agent.active && agent.role == load_role)
        {
            let count = counts.entry(agent.plan_id.clone()).or_default();
            *count = count.saturating_add(1);
        }
        counts
    }
}

async fn destroy_agent(backend: &dyn Clusterable, agent: &mut Agent) -> FleetResult<()> {
    backend.before_destroy_agent(agent).await?;
    backend.after_destroy_agent(agent).await
}

fn agent_span(agent: &Agent) -> Span {
    span!(Level::INFO, "agent", id = %agent.id, role = %agent.role)
}

fn agent_context<'ctx>(
    env: FleetEnv<'ctx>,
    backend: &'ctx dyn Clusterable,
    tool_home: &'ctx str,
    plan: &'ctx dyn TestPlanDescriptor,
    counts: &HashMap<String, u32>,
) -> AgentContext<'ctx> {
    AgentContext {
        connector: env.connector,
        access: backend.remote_access(),
        tool_home,
        plan,
        settings: env.settings,
        agent_count: counts.get(plan.id()).copied().unwrap_or(1).max(1),
    }
}

/// Peer addresses of the active slaves of each plan.
fn slave_addresses(agents: &[Agent]) -> HashMap<String, Vec<String>> {
    let mut peers: HashMap<String, Vec<String>> = HashMap::new();
    for agent in agents
        .iter()
        .filter(|agent| agent.active && agent.role == AgentRole::Slave)
    {
        if let Some(address) = agent.peer_address() {
            peers
                .entry(agent.plan_id.clone())
                .or_default()
                .push(address.to_owned());
        }
    }
    peers
}
