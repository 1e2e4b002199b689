use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::cluster::cloud::{CloudInstance, CloudProvider, InstanceState, LaunchRequest};
use crate::error::{FleetError, FleetResult};

#[derive(Debug, Default)]
struct ProviderState {
    instances: BTreeMap<String, CloudInstance>,
    launched: u32,
    calls: Vec<String>,
    /// Launched instances never leave `Pending`.
    stuck: bool,
}

/// In-memory cloud whose instances move one state per describe call.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeProvider {
    fn lock(&self) -> FleetResult<MutexGuard<'_, ProviderState>> {
        self.state
            .lock()
            .map_err(|_| FleetError::from("fake provider poisoned"))
    }

    pub(crate) fn stuck(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.stuck = true;
        }
    }

    /// Calls in order, as `call instance`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.calls()
            .iter()
            .filter(|recorded| recorded.split(' ').next() == Some(call))
            .count()
    }

    pub(crate) fn instance_state(&self, instance_id: &str) -> Option<InstanceState> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.instances.get(instance_id).map(|instance| instance.state))
    }

    fn transition(&self, call: &str, instance_id: &str, to: InstanceState) -> FleetResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("{} {}", call, instance_id));
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| FleetError::Provider {
                cluster: "fake".to_owned(),
                message: format!("no instance {}", instance_id),
            })?;
        instance.state = to;
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    async fn launch_instance(&self, request: &LaunchRequest) -> FleetResult<CloudInstance> {
        let mut state = self.lock()?;
        state.launched = state.launched.saturating_add(1);
        let seq = state.launched;
        let instance = CloudInstance {
            id: format!("i-{:04}", seq),
            state: InstanceState::Pending,
            public_address: Some(format!("54.0.0.{}", seq)),
            private_address: Some(format!("10.0.0.{}", seq)),
        };
        state
            .calls
            .push(format!("launch {} {}", instance.id, request.name));
        state
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn describe_instance(&self, instance_id: &str) -> FleetResult<Option<CloudInstance>> {
        let mut state = self.lock()?;
        let stuck = state.stuck;
        let Some(instance) = state.instances.get_mut(instance_id) else {
            return Ok(None);
        };
        let observed = instance.clone();
        instance.state = match instance.state {
            InstanceState::Pending if stuck => InstanceState::Pending,
            InstanceState::Pending | InstanceState::Running => InstanceState::Running,
            InstanceState::Stopping | InstanceState::Stopped => InstanceState::Stopped,
            InstanceState::ShuttingDown | InstanceState::Terminated => InstanceState::Terminated,
        };
        Ok(Some(observed))
    }

    async fn start_instance(&self, instance_id: &str) -> FleetResult<()> {
        self.transition("start", instance_id, InstanceState::Pending)
    }

    async fn stop_instance(&self, instance_id: &str) -> FleetResult<()> {
        self.transition("stop", instance_id, InstanceState::Stopping)
    }

    async fn terminate_instance(&self, instance_id: &str) -> FleetResult<()> {
        self.transition("terminate", instance_id, InstanceState::ShuttingDown)
    }

    async fn system_checks_passed(&self, instance_id: &str) -> FleetResult<bool> {
        let state = self.lock()?;
        Ok(state
            .instances
            .get(instance_id)
            .is_some_and(|instance| instance.state == InstanceState::Running))
    }
}
