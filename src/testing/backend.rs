use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::agent::Agent;
use crate::cluster::{BackendFactory, BackendKind, ClusterSpec, Clusterable, StopOptions};
use crate::error::{FleetError, FleetResult};
use crate::plan::TestPlanDescriptor;
use crate::remote::RemoteAccess;

pub(crate) const FAKE_USER: &str = "loadgen";

/// Hook calls across every fake backend, as `identity: hook`.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    fn record(&self, entry: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .filter(|recorded| recorded.as_str() == entry)
            .count()
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: HashSet<String>,
    failing_destroy: HashSet<String>,
}

/// Builds `FakeBackend`s for any cluster spec, with scripted faults.
#[derive(Debug, Clone)]
pub(crate) struct FakeBackends {
    threads_per_agent: u32,
    journal: Arc<Journal>,
    faults: Arc<Mutex<Faults>>,
}

impl FakeBackends {
    pub(crate) fn new(threads_per_agent: u32) -> Self {
        Self {
            threads_per_agent,
            journal: Arc::new(Journal::default()),
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    pub(crate) fn journal(&self) -> Arc<Journal> {
        Arc::clone(&self.journal)
    }

    /// Backend setup for `identity` fails with a connectivity error.
    pub(crate) fn unreachable(&self, identity: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unreachable.insert(identity.to_owned());
        }
    }

    pub(crate) fn fail_destroy(&self, agent_id: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_destroy.insert(agent_id.to_owned());
        }
    }

    pub(crate) fn heal(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
    }
}

impl BackendFactory for FakeBackends {
    fn build(&self, spec: &ClusterSpec) -> FleetResult<Box<dyn Clusterable>> {
        Ok(Box::new(FakeBackend {
            identity: spec.identity(),
            kind: spec.kind(),
            active: spec.is_active(),
            access: RemoteAccess::new(FAKE_USER),
            threads_per_agent: self.threads_per_agent.max(1),
            journal: Arc::clone(&self.journal),
            faults: Arc::clone(&self.faults),
        }))
    }
}

/// Backend whose agents need no provisioning; addresses derive from the
/// agent id.
pub(crate) struct FakeBackend {
    identity: String,
    kind: BackendKind,
    active: bool,
    access: RemoteAccess,
    threads_per_agent: u32,
    journal: Arc<Journal>,
    faults: Arc<Mutex<Faults>>,
}

impl FakeBackend {
    fn record(&self, hook: &str) {
        self.journal.record(format!("{}: {}", self.identity, hook));
    }

    fn has_fault(&self, read: impl FnOnce(&Faults) -> bool) -> bool {
        self.faults.lock().map(|faults| read(&faults)).unwrap_or(false)
    }
}

#[async_trait]
impl Clusterable for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn slug(&self) -> String {
        format!("Fake {}", self.identity)
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn remote_access(&self) -> &RemoteAccess {
        &self.access
    }

    fn required_agent_count(&self, plan: &dyn TestPlanDescriptor) -> usize {
        let count = plan.num_threads().div_ceil(self.threads_per_agent).max(1);
        usize::try_from(count).unwrap_or(1)
    }

    async fn setup_backend(&mut self, _force: bool) -> FleetResult<()> {
        self.record("setup");
        if self.has_fault(|faults| faults.unreachable.contains(&self.identity)) {
            return Err(FleetError::BackendConnectivity {
                host: self.identity.clone(),
                user: FAKE_USER.to_owned(),
                attempts: 3,
            });
        }
        Ok(())
    }

    async fn prepare_new_agent(
        &self,
        agent: &mut Agent,
        _plan: &dyn TestPlanDescriptor,
    ) -> FleetResult<()> {
        self.record("prepare");
        let address = format!("{}.test", agent.id);
        agent.public_address = Some(address.clone());
        agent.private_address = Some(address);
        Ok(())
    }

    async fn before_destroy_agent(&self, agent: &mut Agent) -> FleetResult<()> {
        self.record("before_destroy");
        if self.has_fault(|faults| faults.failing_destroy.contains(&agent.id)) {
            return Err(FleetError::Provider {
                cluster: self.identity.clone(),
                message: format!("could not release {}", agent.id),
            });
        }
        Ok(())
    }

    async fn after_destroy_agent(&self, _agent: &Agent) -> FleetResult<()> {
        self.record("after_destroy");
        Ok(())
    }

    async fn after_generate_load(&self, _agents: &[Agent]) -> FleetResult<()> {
        self.record("after_generate_load");
        Ok(())
    }

    async fn before_stop_load_generation(&self, _agents: &[Agent]) -> FleetResult<()> {
        self.record("before_stop");
        Ok(())
    }

    async fn after_stop_load_generation(
        &self,
        _agents: &mut [Agent],
        options: StopOptions,
    ) -> FleetResult<()> {
        self.record(if options.suspend {
            "after_stop suspend"
        } else {
            "after_stop"
        });
        Ok(())
    }

    async fn cleanup(&mut self) -> FleetResult<()> {
        self.record("cleanup");
        Ok(())
    }
}
