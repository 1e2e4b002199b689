//! One worker node and the load-generator process it runs.
mod context;
mod lifecycle;

#[cfg(test)]
mod tests;

pub use context::AgentContext;
pub use lifecycle::StopOutcome;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// Runs the test plan, alone or coordinating slaves.
    Master,
    /// Runs in server mode and takes orders from a master.
    Slave,
}

impl AgentRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AgentRole::Master => "master",
            AgentRole::Slave => "slave",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No network address yet.
    NotProvisioned,
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub role: AgentRole,
    pub plan_id: String,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
    /// Backend handle: a cloud instance id, or the machine address in a data
    /// center.
    pub instance_id: Option<String>,
    pub process_id: Option<u32>,
    pub active: bool,
    /// True until artifacts were synced once.
    pub first_use: bool,
    /// Plan content hash at the last sync.
    pub synced_hash: Option<String>,
}

impl Agent {
    #[must_use]
    pub fn new(id: impl Into<String>, role: AgentRole, plan_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            plan_id: plan_id.into(),
            public_address: None,
            private_address: None,
            instance_id: None,
            process_id: None,
            active: true,
            first_use: true,
            synced_hash: None,
        }
    }

    /// Address used to reach the agent from the orchestrator.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.public_address
            .as_deref()
            .or(self.private_address.as_deref())
    }

    /// Address peers inside the cluster use to reach the agent.
    #[must_use]
    pub fn peer_address(&self) -> Option<&str> {
        self.private_address
            .as_deref()
            .or(self.public_address.as_deref())
    }

    #[must_use]
    pub const fn is_master(&self) -> bool {
        matches!(self.role, AgentRole::Master)
    }

    #[must_use]
    pub fn state(&self) -> AgentState {
        if self.address().is_none() {
            AgentState::NotProvisioned
        } else if self.process_id.is_some() {
            AgentState::Running
        } else {
            AgentState::Idle
        }
    }

    /// Forgets the backend resource so the agent can be provisioned again.
    pub fn clear_addresses(&mut self) {
        self.public_address = None;
        self.private_address = None;
        self.process_id = None;
    }
}
