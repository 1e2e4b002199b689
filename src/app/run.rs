use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::args::RunArgs;
use crate::cluster::{
    ClusterCoordinator, ClusterSpec, RemoteResultCollector, ResultCollector, StandardBackends,
    StopOptions,
};
use crate::config::FleetSetup;
use crate::error::{AppResult, FleetError, FleetResult};
use crate::plan::TestPlanDescriptor;
use crate::remote::{RemoteConnector, SshConnector};
use crate::system::shutdown::ShutdownReceiver;

/// Results of one run land in `<results_dir>/<start time>/<cluster code>`.
const RUN_DIR_FORMAT: &str = "%Y%m%d-%H%M%S";

/// How a `run` ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Codes of the clusters that stopped generating load.
    pub stopped: Vec<String>,
    pub aborted: bool,
    pub terminated: bool,
    pub results_dir: Option<PathBuf>,
}

/// Runs every plan in `setup` over SSH-reachable clusters until the plans
/// finish, the time limit passes, or a shutdown signal arrives.
///
/// # Errors
///
/// Returns the first configuration, provisioning or stop failure.
pub async fn run_fleet(
    setup: &FleetSetup,
    run: &RunArgs,
    shutdown: &mut ShutdownReceiver,
) -> AppResult<RunSummary> {
    let settings = setup.settings.with_env_overrides();
    let plans: Vec<Arc<dyn TestPlanDescriptor>> = setup
        .load_plans()?
        .into_iter()
        .map(|plan| Arc::new(plan) as Arc<dyn TestPlanDescriptor>)
        .collect();
    let connector: Arc<dyn RemoteConnector> = Arc::new(SshConnector::new(settings));
    let backends = StandardBackends::new(Arc::clone(&connector), settings);
    let started_at = Utc::now();
    let results_dir = setup
        .results_dir
        .join(started_at.format(RUN_DIR_FORMAT).to_string());
    let collector = RemoteResultCollector::new(results_dir.clone());
    let mut coordinator =
        ClusterCoordinator::new(setup.project.clone(), settings, connector, Arc::new(backends))
            .with_plans(plans)
            .with_master_slave(setup.master_slave)
            .with_collector(Arc::new(collector) as Arc<dyn ResultCollector>);

    start_fleet(&mut coordinator, &setup.clusters, run).await?;
    let mut summary = finish_fleet(&mut coordinator, run, shutdown).await?;
    let elapsed = Utc::now().signed_duration_since(started_at);
    info!("Run lasted {}s", elapsed.num_seconds());
    summary.results_dir = Some(results_dir);
    Ok(summary)
}

/// Brings the clusters in line with `desired` and starts load on all of them.
/// Agents that did start are stopped again when another cluster fails. An
/// execution that is already running is left untouched.
///
/// # Errors
///
/// Returns the reconcile or start failure.
pub async fn start_fleet(
    coordinator: &mut ClusterCoordinator,
    desired: &[ClusterSpec],
    run: &RunArgs,
) -> AppResult<()> {
    info!(
        "Configuring {} cluster(s) for project {}",
        desired.len(),
        coordinator.project()
    );
    coordinator.reconcile(desired, run.force).await?;
    match coordinator.generate_all_load(run.redeploy).await {
        Ok(()) => {}
        Err(err @ FleetError::ExecutionInProgress { .. }) => return Err(err.into()),
        Err(err) => {
            error!("Load generation failed to start: {}", err);
            let options = StopOptions {
                suspend: run.suspend,
            };
            if let Err(stop_err) = coordinator
                .stop_all_load_generation(false, true, options)
                .await
            {
                warn!("Stopping the agents that did start failed: {}", stop_err);
            }
            return Err(err.into());
        }
    }
    info!("Load generation started");
    Ok(())
}

/// Waits for the test to end, then stops every cluster and optionally tears
/// them down.
///
/// # Errors
///
/// Returns the status, stop or terminate failure.
pub async fn finish_fleet(
    coordinator: &mut ClusterCoordinator,
    run: &RunArgs,
    shutdown: &mut ShutdownReceiver,
) -> AppResult<RunSummary> {
    let aborted = wait_for_exit(coordinator, run.max_duration, shutdown).await?;
    let options = StopOptions {
        suspend: run.suspend,
    };
    let report = coordinator
        .stop_all_load_generation(!aborted, aborted, options)
        .await?;
    if report.is_refused() {
        warn!("Still generating load on {}", report.refused.join(", "));
    }

    let terminated = if run.terminate {
        coordinator.terminate().await?;
        info!("All clusters terminated");
        true
    } else {
        false
    };
    Ok(RunSummary {
        stopped: report.stopped,
        aborted,
        terminated,
        results_dir: None,
    })
}

/// True when the wait ended by shutdown or time limit rather than by every
/// master exiting.
async fn wait_for_exit(
    coordinator: &ClusterCoordinator,
    limit: Option<Duration>,
    shutdown: &mut ShutdownReceiver,
) -> FleetResult<bool> {
    let interval = coordinator.settings().exit_poll_interval;
    let deadline = limit.and_then(|limit| Instant::now().checked_add(limit));
    loop {
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown requested");
                return Ok(true);
            }
            () = expired => {
                warn!("Maximum duration reached");
                return Ok(true);
            }
            () = tokio::time::sleep(interval) => {}
        }
        let running = coordinator.check_status().await?;
        if running.is_empty() {
            info!("All load generators finished");
            return Ok(false);
        }
        info!("{} master(s) still generating load", running.len());
    }
}
