use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{Cluster, FleetEnv};
use crate::error::{FleetError, FleetResult};

/// Gathers test results once a cluster stopped without aborting.
#[async_trait]
pub trait ResultCollector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when results could not be gathered.
    async fn collect(&self, env: FleetEnv<'_>, cluster: &Cluster) -> FleetResult<()>;
}

/// Downloads each active master's results file into
/// `<local_dir>/<cluster code>/`.
#[derive(Debug, Clone)]
pub struct RemoteResultCollector {
    local_dir: PathBuf,
}

impl RemoteResultCollector {
    #[must_use]
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.into(),
        }
    }

    #[must_use]
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }
}

#[async_trait]
impl ResultCollector for RemoteResultCollector {
    async fn collect(&self, env: FleetEnv<'_>, cluster: &Cluster) -> FleetResult<()> {
        let target = self.local_dir.join(cluster.code());
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|err| FleetError::io(format!("creating {}", target.display()), err))?;

        let backend = cluster.backend();
        let access = backend.remote_access();
        let home = access.user_home();
        for agent in cluster
            .agents()
            .iter()
            .filter(|agent| agent.active && agent.is_master())
        {
            let Some(address) = agent.address() else {
                continue;
            };
            let plan = env.plan(&agent.plan_id)?;
            let remote = format!("{}/{}", home, plan.remote_result_file());
            let file_name = remote.rsplit('/').next().unwrap_or("results.jtl");
            let local = target.join(format!("{}-{}", agent.id, file_name));
            info!("Collecting results from {}...", agent.id);
            let shell = env.connector.connect(address, access).await?;
            shell.download_file(&remote, &local).await?;
        }
        Ok(())
    }
}
