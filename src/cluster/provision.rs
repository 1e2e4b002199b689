//! Per-plan agent provisioning: topology checks, activation, creation and
//! retirement of agents so a cluster matches what a plan needs.
use tracing::{debug, info};

use super::{AgentPlacement, Cluster};
use crate::agent::{Agent, AgentRole};
use crate::error::{AggregatedFailure, FleetError, FleetResult};
use crate::plan::TestPlanDescriptor;
use crate::support::run_all_unit;

impl Cluster {
    pub(super) async fn provision_plan(
        &mut self,
        plan: &dyn TestPlanDescriptor,
        master_slave: bool,
    ) -> FleetResult<()> {
        let placement = self.backend.placement(plan);
        debug!("Provisioning {} with {:?}", plan.id(), placement);
        let load_role = self.master_slave_relation(plan, master_slave, &placement).await?;
        match placement {
            AgentPlacement::Count(required) => self.scale_to(plan, load_role, required).await,
            AgentPlacement::Machines(machines) => {
                let machines = if master_slave {
                    machines.get(1..).unwrap_or_default().to_vec()
                } else {
                    machines
                };
                self.match_machines(plan, load_role, &machines).await
            }
        }
    }

    /// Checks the plan's agents agree with the topology and returns the role
    /// that carries the load. In master/slave topology this also makes sure
    /// the plan has its one master.
    async fn master_slave_relation(
        &mut self,
        plan: &dyn TestPlanDescriptor,
        master_slave: bool,
        placement: &AgentPlacement,
    ) -> FleetResult<AgentRole> {
        if !master_slave {
            if self.plan_agents(plan.id(), AgentRole::Slave).next().is_some() {
                return Err(FleetError::MasterSlaveSwitchOff {
                    cluster: self.code.clone(),
                    plan: plan.id().to_owned(),
                });
            }
            return Ok(AgentRole::Master);
        }

        let masters = self.plan_agents(plan.id(), AgentRole::Master).count();
        if masters > 1 {
            return Err(FleetError::MasterSlaveSwitchOn {
                cluster: self.code.clone(),
                plan: plan.id().to_owned(),
            });
        }
        if masters == 1 {
            for agent in self.plan_agents_mut(plan.id(), AgentRole::Master) {
                agent.active = true;
            }
        } else {
            let mut master = self.next_agent(AgentRole::Master, plan.id());
            if let AgentPlacement::Machines(machines) = placement
                && let Some(machine) = machines.first()
            {
                bind_machine(&mut master, machine);
            }
            self.admit(plan, vec![master]).await?;
        }
        Ok(AgentRole::Slave)
    }

    /// Interchangeable agents: reactivate inactive ones first, create the
    /// rest, retire any surplus.
    async fn scale_to(
        &mut self,
        plan: &dyn TestPlanDescriptor,
        role: AgentRole,
        required: usize,
    ) -> FleetResult<()> {
        let mut active = self
            .plan_agents(plan.id(), role)
            .filter(|agent| agent.active)
            .count();

        if active > required {
            let surplus = active.saturating_sub(required);
            info!("Retiring {} {} agent(s) for {}", surplus, role, plan.id());
            for agent in self
                .plan_agents_mut(plan.id(), role)
                .filter(|agent| agent.active)
                .skip(required)
            {
                agent.active = false;
            }
            return Ok(());
        }

        for agent in self
            .plan_agents_mut(plan.id(), role)
            .filter(|agent| !agent.active)
        {
            if active >= required {
                break;
            }
            agent.active = true;
            active = active.saturating_add(1);
        }

        let missing = required.saturating_sub(active);
        if missing == 0 {
            return Ok(());
        }
        info!("Creating {} {} agent(s) for {}", missing, role, plan.id());
        let fresh = (0..missing)
            .map(|_| self.next_agent(role, plan.id()))
            .collect();
        self.admit(plan, fresh).await
    }

    /// One agent per machine: agents on machines no longer listed are
    /// retired, listed machines without an agent get a new one.
    async fn match_machines(
        &mut self,
        plan: &dyn TestPlanDescriptor,
        role: AgentRole,
        machines: &[String],
    ) -> FleetResult<()> {
        let mut known: Vec<String> = Vec::new();
        for agent in self.plan_agents_mut(plan.id(), role) {
            let listed = agent
                .instance_id
                .as_ref()
                .is_some_and(|machine| machines.contains(machine));
            agent.active = listed;
            if let Some(machine) = agent.instance_id.as_ref().filter(|_| listed) {
                known.push(machine.clone());
            }
        }

        let added: Vec<&String> = machines
            .iter()
            .filter(|machine| !known.contains(machine))
            .collect();
        if added.is_empty() {
            return Ok(());
        }
        info!("Adding {} machine(s) for {}", added.len(), plan.id());
        let fresh = added
            .into_iter()
            .map(|machine| {
                let mut agent = self.next_agent(role, plan.id());
                bind_machine(&mut agent, machine);
                agent
            })
            .collect();
        self.admit(plan, fresh).await
    }

    /// Has the backend prepare each new agent, concurrently when there is
    /// more than one. Agents that fail preparation are dropped.
    async fn admit(
        &mut self,
        plan: &dyn TestPlanDescriptor,
        fresh: Vec<Agent>,
    ) -> FleetResult<()> {
        let start = self.agents.len();
        self.agents.extend(fresh);
        let backend = self.backend.as_ref();
        let prepared = run_all_unit(self.agents.iter_mut().skip(start), move |agent| async move {
            agent.active = false;
            backend.prepare_new_agent(agent, plan).await?;
            agent.active = true;
            Ok(())
        })
        .await;

        let mut position: usize = 0;
        self.agents.retain(|agent| {
            let keep = position < start || agent.active;
            position = position.saturating_add(1);
            keep
        });
        prepared.map_err(|failures| self.creation_failure(failures))
    }

    fn creation_failure(&self, failures: AggregatedFailure) -> FleetError {
        if failures.len() == 1 {
            return failures.into_error();
        }
        FleetError::AgentCreation {
            cluster: self.backend.slug(),
            reason: failures.to_string(),
        }
    }

    fn plan_agents<'inv>(
        &'inv self,
        plan_id: &'inv str,
        role: AgentRole,
    ) -> impl Iterator<Item = &'inv Agent> + 'inv {
        self.agents
            .iter()
            .filter(move |agent| agent.role == role && agent.plan_id == plan_id)
    }

    fn plan_agents_mut<'inv>(
        &'inv mut self,
        plan_id: &'inv str,
        role: AgentRole,
    ) -> impl Iterator<Item = &'inv mut Agent> + 'inv {
        self.agents
            .iter_mut()
            .filter(move |agent| agent.role == role && agent.plan_id == plan_id)
    }
}

fn bind_machine(agent: &mut Agent, machine: &str) {
    agent.public_address = Some(machine.to_owned());
    agent.private_address = Some(machine.to_owned());
    agent.instance_id = Some(machine.to_owned());
}
