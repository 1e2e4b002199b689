//! Project-wide driver: reconciles desired clusters with the configured ones
//! and fans load generation out across them.
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use super::lifecycle::RunningAgent;
use super::{
    BackendFactory, BackendKind, Cluster, ClusterSpec, ClusterState, ClusterStopOutcome,
    Clusterable, FleetEnv, ResultCollector, StopOptions, generate_code,
};
use crate::error::{AggregatedFailure, FleetError, FleetResult};
use crate::plan::TestPlanDescriptor;
use crate::remote::RemoteConnector;
use crate::settings::OrchestratorSettings;
use crate::support::{run_all, run_all_unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Idle,
    Started,
    Stopped,
    Aborted,
}

/// Clusters that stopped, and clusters still running a test that was neither
/// waited for nor aborted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub stopped: Vec<String>,
    pub refused: Vec<String>,
}

impl StopReport {
    #[must_use]
    pub fn is_refused(&self) -> bool {
        !self.refused.is_empty()
    }
}

struct Project {
    name: String,
    connector: Arc<dyn RemoteConnector>,
    settings: OrchestratorSettings,
    plans: Vec<Arc<dyn TestPlanDescriptor>>,
    master_slave: bool,
}

impl Project {
    fn env(&self) -> FleetEnv<'_> {
        FleetEnv {
            connector: self.connector.as_ref(),
            settings: &self.settings,
            plans: &self.plans,
            master_slave: self.master_slave,
        }
    }
}

/// Pre-reconcile state of an existing cluster.
struct Snapshot {
    active: bool,
    state: ClusterState,
    agents: Vec<bool>,
}

impl Snapshot {
    fn restore_activation(&self, cluster: &mut Cluster) {
        cluster.backend.set_active(self.active);
        for (position, agent) in cluster.agents.iter_mut().enumerate() {
            agent.active = self.agents.get(position).copied().unwrap_or(false);
        }
    }
}

enum Slot {
    Existing {
        index: usize,
        previous: Box<dyn Clusterable>,
    },
    New {
        index: usize,
    },
}

pub struct ClusterCoordinator {
    project: Project,
    backends: Arc<dyn BackendFactory>,
    clusters: Vec<Cluster>,
    collector: Option<Arc<dyn ResultCollector>>,
    status: ExecutionStatus,
}

impl ClusterCoordinator {
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        settings: OrchestratorSettings,
        connector: Arc<dyn RemoteConnector>,
        backends: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            project: Project {
                name: project.into(),
                connector,
                settings,
                plans: Vec::new(),
                master_slave: false,
            },
            backends,
            clusters: Vec::new(),
            collector: None,
            status: ExecutionStatus::Idle,
        }
    }

    #[must_use]
    pub fn with_plans(mut self, plans: Vec<Arc<dyn TestPlanDescriptor>>) -> Self {
        self.project.plans = plans;
        self
    }

    #[must_use]
    pub const fn with_master_slave(mut self, master_slave: bool) -> Self {
        self.project.master_slave = master_slave;
        self
    }

    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn ResultCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project.name
    }

    #[must_use]
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.project.settings
    }

    #[must_use]
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    #[must_use]
    pub fn cluster(&self, code: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|cluster| cluster.code() == code)
    }

    #[must_use]
    pub const fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Brings the configured clusters in line with `desired`.
    ///
    /// Every existing cluster is deactivated first; each desired entry then
    /// finds its cluster by backend kind and identity, or gets a new one, and
    /// is set up. Clusters absent from `desired` stay inactive. Repeated
    /// entries for one identity are ignored after the first.
    ///
    /// A cluster whose setup fails is put back the way it was before the
    /// call (a new one is terminated and dropped); the others keep their new
    /// configuration. Clusters absent from `desired` get their previous
    /// activation back when anything fails.
    ///
    /// # Errors
    ///
    /// Returns the backend construction error before anything changes, or
    /// `FleetError::Aggregated` with one entry per cluster that failed setup.
    pub async fn reconcile(&mut self, desired: &[ClusterSpec], force: bool) -> FleetResult<()> {
        let mut seen: HashSet<(BackendKind, String)> = HashSet::new();
        let mut built = Vec::with_capacity(desired.len());
        for spec in desired {
            if !seen.insert((spec.kind(), spec.identity())) {
                warn!(
                    "Ignoring repeated {} cluster {}",
                    spec.kind(),
                    spec.identity()
                );
                continue;
            }
            built.push((spec, self.backends.build(spec)?));
        }

        let snapshots: Vec<Snapshot> = self
            .clusters
            .iter()
            .map(|cluster| Snapshot {
                active: cluster.is_active(),
                state: cluster.state(),
                agents: cluster.agents().iter().map(|agent| agent.active).collect(),
            })
            .collect();
        for cluster in &mut self.clusters {
            cluster.deactivate();
        }

        let mut slots = Vec::with_capacity(built.len());
        for (spec, backend) in built {
            let existing = self.clusters.iter().position(|cluster| {
                cluster.kind() == spec.kind() && cluster.backend().identity() == spec.identity()
            });
            match existing {
                Some(index) => {
                    let previous = match self.clusters.get_mut(index) {
                        Some(cluster) => cluster.replace_backend(backend),
                        None => continue,
                    };
                    slots.push(Slot::Existing { index, previous });
                }
                None => {
                    let code = self.assign_code(spec.code());
                    info!("Configuring new {} cluster {}", spec.kind(), code);
                    self.clusters.push(Cluster::new(code, backend));
                    slots.push(Slot::New {
                        index: self.clusters.len().saturating_sub(1),
                    });
                }
            }
        }

        let configured: HashSet<usize> = slots
            .iter()
            .map(|slot| match slot {
                Slot::Existing { index, .. } | Slot::New { index } => *index,
            })
            .collect();
        let env = self.project.env();
        let targets = self
            .clusters
            .iter_mut()
            .enumerate()
            .filter(|(index, _)| configured.contains(index))
            .map(|(_, cluster)| cluster);
        let outcome = run_all_unit(targets, move |cluster| async move {
            cluster
                .setup(env, force)
                .await
                .map_err(|err| err.in_cluster(cluster.code()))
        })
        .await;

        if let Err(failures) = outcome {
            self.roll_back(slots, &snapshots, &configured).await;
            return Err(FleetError::Aggregated(failures));
        }
        Ok(())
    }

    async fn roll_back(
        &mut self,
        slots: Vec<Slot>,
        snapshots: &[Snapshot],
        configured: &HashSet<usize>,
    ) {
        for (index, snapshot) in snapshots.iter().enumerate() {
            if configured.contains(&index) {
                continue;
            }
            if let Some(cluster) = self.clusters.get_mut(index) {
                snapshot.restore_activation(cluster);
            }
        }

        let mut discarded = Vec::new();
        for slot in slots {
            match slot {
                Slot::Existing { index, previous } => {
                    let (Some(cluster), Some(snapshot)) =
                        (self.clusters.get_mut(index), snapshots.get(index))
                    else {
                        continue;
                    };
                    if cluster.state() != ClusterState::Unconfigured {
                        continue;
                    }
                    warn!("Restoring the previous configuration of {}", cluster.code());
                    cluster.replace_backend(previous);
                    snapshot.restore_activation(cluster);
                    cluster.state = snapshot.state;
                }
                Slot::New { index } => {
                    let Some(cluster) = self.clusters.get_mut(index) else {
                        continue;
                    };
                    if cluster.state() != ClusterState::Unconfigured {
                        continue;
                    }
                    cluster.deactivate();
                    match cluster.terminate().await {
                        Ok(()) => discarded.push(index),
                        Err(err) => warn!("Could not discard {}: {}", cluster.code(), err),
                    }
                }
            }
        }
        discarded.sort_unstable();
        for index in discarded.into_iter().rev() {
            if index < self.clusters.len() {
                self.clusters.remove(index);
            }
        }
    }

    fn assign_code(&self, preferred: Option<&str>) -> String {
        let taken = |code: &str| self.clusters.iter().any(|cluster| cluster.code() == code);
        if let Some(code) = preferred.filter(|code| !taken(*code)) {
            return code.to_owned();
        }
        let mut rng = rand::thread_rng();
        generate_code(&mut rng, taken)
    }

    /// Starts load generation on every active cluster concurrently.
    ///
    /// Refused while the current execution is started or any agent still
    /// holds a pid; stop or abort first.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::ExecutionInProgress` without touching any agent,
    /// or `FleetError::Aggregated` with one entry per failed cluster; the
    /// execution is then marked aborted.
    pub async fn generate_all_load(&mut self, redeploy: bool) -> FleetResult<()> {
        let holding_pid = self
            .clusters
            .iter()
            .flat_map(Cluster::agents)
            .any(|agent| agent.process_id.is_some());
        if self.status == ExecutionStatus::Started || holding_pid {
            return Err(FleetError::ExecutionInProgress {
                project: self.project.name.clone(),
            });
        }

        let env = self.project.env();
        let targets = self.clusters.iter_mut().filter(|cluster| cluster.is_active());
        let outcome = run_all_unit(targets, move |cluster| async move {
            cluster
                .generate_load(env, redeploy)
                .await
                .map_err(|err| err.in_cluster(cluster.code()))
        })
        .await;
        match outcome {
            Ok(()) => {
                self.status = ExecutionStatus::Started;
                Ok(())
            }
            Err(failures) => {
                self.status = ExecutionStatus::Aborted;
                Err(FleetError::Aggregated(failures))
            }
        }
    }

    /// Stops load generation on every active cluster concurrently.
    ///
    /// Clusters still running a test that was neither waited for nor aborted
    /// are reported as refused and the execution stays started.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::Aggregated` with one entry per failed cluster; the
    /// execution is then marked aborted.
    pub async fn stop_all_load_generation(
        &mut self,
        wait: bool,
        aborted: bool,
        options: StopOptions,
    ) -> FleetResult<StopReport> {
        let env = self.project.env();
        let collector = self.collector.as_deref();
        let targets = self.clusters.iter_mut().filter(|cluster| cluster.is_active());
        let outcome = run_all(targets, move |cluster| async move {
            let stopped = cluster
                .stop_load_generation(env, wait, aborted, options, collector)
                .await
                .map_err(|err| err.in_cluster(cluster.code()))?;
            Ok((cluster.code().to_owned(), stopped))
        })
        .await;

        let outcomes = match outcome {
            Ok(outcomes) => outcomes,
            Err(failures) => {
                self.status = ExecutionStatus::Aborted;
                return Err(FleetError::Aggregated(failures));
            }
        };

        let mut report = StopReport::default();
        for (code, stopped) in outcomes {
            match stopped {
                ClusterStopOutcome::Stopped => report.stopped.push(code),
                ClusterStopOutcome::Refused => report.refused.push(code),
            }
        }
        if report.is_refused() {
            info!(
                "Load generation continues on {}; wait or abort to stop it",
                report.refused.join(", ")
            );
        } else {
            self.status = if aborted {
                ExecutionStatus::Aborted
            } else {
                ExecutionStatus::Stopped
            };
        }
        Ok(report)
    }

    /// Masters still generating load across all active clusters.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::Aggregated` with one entry per cluster whose
    /// status could not be read.
    pub async fn check_status(&self) -> FleetResult<Vec<RunningAgent>> {
        let env = self.project.env();
        let targets = self.clusters.iter().filter(|cluster| cluster.is_active());
        let running = run_all(targets, move |cluster| async move {
            cluster
                .check_status(env)
                .await
                .map_err(|err| err.in_cluster(cluster.code()))
        })
        .await
        .map_err(FleetError::Aggregated)?;
        Ok(running.into_iter().flatten().collect())
    }

    /// Destroys every agent and backend. Clusters that were torn down are
    /// dropped; failed ones remain for another attempt.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::Aggregated` with one entry per cluster that could
    /// not be fully torn down.
    pub async fn terminate(&mut self) -> FleetResult<()> {
        let outcome = run_all_unit(self.clusters.iter_mut(), |cluster| async move {
            cluster
                .terminate()
                .await
                .map_err(|err| err.in_cluster(cluster.code()))
        })
        .await;
        self.clusters
            .retain(|cluster| cluster.state() != ClusterState::Terminated);
        self.status = ExecutionStatus::Idle;
        outcome.map_err(FleetError::Aggregated)
    }

    /// Tears down and drops inactive clusters. Returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::Aggregated` naming every inactive cluster that
    /// still has running agents or could not be torn down; those are kept.
    pub async fn purge_inactive(&mut self) -> FleetResult<usize> {
        let mut failures = AggregatedFailure::default();
        let mut candidates = Vec::new();
        for (index, cluster) in self.clusters.iter().enumerate() {
            if cluster.is_active() {
                continue;
            }
            let running = cluster
                .agents()
                .iter()
                .filter(|agent| agent.process_id.is_some())
                .count();
            if running > 0 {
                failures.push(FleetError::InactiveClusterHasRunningAgents {
                    cluster: cluster.code().to_owned(),
                    running,
                });
            } else {
                candidates.push(index);
            }
        }

        let targets = self
            .clusters
            .iter_mut()
            .enumerate()
            .filter(|(index, _)| candidates.contains(index))
            .map(|(_, cluster)| cluster);
        if let Err(teardown) = run_all_unit(targets, |cluster| async move {
            cluster
                .terminate()
                .await
                .map_err(|err| err.in_cluster(cluster.code()))
        })
        .await
        {
            for failure in teardown.into_inner() {
                failures.push(failure);
            }
        }

        let before = self.clusters.len();
        self.clusters
            .retain(|cluster| cluster.state() != ClusterState::Terminated);
        let purged = before.saturating_sub(self.clusters.len());
        if failures.is_empty() {
            Ok(purged)
        } else {
            Err(FleetError::Aggregated(failures))
        }
    }
}
