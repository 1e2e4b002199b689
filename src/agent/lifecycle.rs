use tracing::{debug, info, warn};

use super::{Agent, AgentContext, AgentRole};
use crate::error::{FleetError, FleetResult};
use crate::plan::render_command;
use crate::remote::RemoteShell;

/// Result of asking an agent to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// Nothing was running.
    AlreadyStopped,
    /// The test is still running and neither waiting nor aborting was asked
    /// for. The process is left untouched.
    Refused,
}

impl StopOutcome {
    #[must_use]
    pub const fn is_refused(self) -> bool {
        matches!(self, StopOutcome::Refused)
    }
}

impl Agent {
    async fn shell(&self, ctx: &AgentContext<'_>) -> FleetResult<Box<dyn RemoteShell>> {
        let address = self.address().ok_or_else(|| FleetError::MissingAddress {
            agent: self.id.clone(),
        })?;
        ctx.connector.connect(address, ctx.access).await
    }

    /// Syncs plan artifacts on first use, on `force`, or when the plan changed
    /// since the last sync. The remote directory tree is only created on first
    /// use or `force`. Returns whether anything was uploaded.
    ///
    /// # Errors
    ///
    /// Returns an error when the agent has no address or a transfer fails.
    pub async fn upload_artifacts_if_needed(
        &mut self,
        ctx: &AgentContext<'_>,
        force: bool,
    ) -> FleetResult<bool> {
        let changed = ctx.plan.content_changed(self.synced_hash.as_deref());
        if !(force || self.first_use || changed) {
            return Ok(false);
        }

        info!("Uploading {} artifacts to {}...", ctx.plan.id(), self.id);
        let shell = self.shell(ctx).await?;
        let home = ctx.access.user_home();
        if force || self.first_use {
            for directory in ctx.plan.remote_directory_layout().flatten(&home) {
                shell.make_directory(&directory).await?;
            }
        }
        for artifact in ctx.plan.artifacts() {
            let remote = format!("{}/{}", home, artifact.remote);
            shell.upload_file(&artifact.local, &remote).await?;
        }

        self.first_use = false;
        self.synced_hash = Some(ctx.plan.content_hash().to_owned());
        Ok(true)
    }

    /// Launches the load generator for this agent's role and records its pid.
    ///
    /// A master in master/slave topology receives the slaves' peer addresses.
    /// A pid left over from an earlier run is replaced.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::ProcessStartFailure` when no process shows up after
    /// the launch, or the transport error.
    pub async fn start(
        &mut self,
        ctx: &AgentContext<'_>,
        slave_addresses: &[String],
    ) -> FleetResult<()> {
        let shell = self.shell(ctx).await?;
        let own_address = self.peer_address().unwrap_or_else(|| shell.host());
        let template = match self.role {
            AgentRole::Master => {
                ctx.plan
                    .master_command_template(own_address, slave_addresses, ctx.agent_count)
            }
            AgentRole::Slave => ctx.plan.slave_command_template(own_address, ctx.agent_count),
        };
        let command = render_command(&template, &ctx.template_vars());
        debug!("Starting {} on {}: {}", self.role, self.id, command);
        shell.run(&command).await?;

        let binary = ctx.plan.binary_name();
        match shell.find_process_id(binary).await? {
            Some(pid) => {
                info!("Started {} on {} (pid {})", binary, self.id, pid);
                self.process_id = Some(pid);
                Ok(())
            }
            None => Err(FleetError::ProcessStartFailure {
                agent: self.id.clone(),
                address: shell.host().to_owned(),
                binary: binary.to_owned(),
            }),
        }
    }

    /// Stops the load generator.
    ///
    /// A master honours `wait` and `aborted`: plans that loop forever are
    /// always stopped, a finished process only has its pid cleared, `wait`
    /// blocks until the process exits, `aborted` sends the stop command, and
    /// anything else is refused. A slave waits for the shutdown its master
    /// propagates and is force-terminated if it lingers.
    ///
    /// # Errors
    ///
    /// Returns the transport error of any remote call.
    pub async fn stop(
        &mut self,
        ctx: &AgentContext<'_>,
        wait: bool,
        aborted: bool,
    ) -> FleetResult<StopOutcome> {
        let Some(pid) = self.process_id else {
            return Ok(StopOutcome::AlreadyStopped);
        };
        let shell = self.shell(ctx).await?;

        if self.role == AgentRole::Slave {
            await_shutdown(shell.as_ref(), ctx, pid).await?;
            self.process_id = None;
            return Ok(StopOutcome::Stopped);
        }

        if !ctx.plan.loops_forever() {
            if !shell.is_process_running(pid).await? {
                debug!("{} on {} has already exited", pid, self.id);
                self.process_id = None;
                return Ok(StopOutcome::AlreadyStopped);
            }
            if wait {
                while shell.is_process_running(pid).await? {
                    info!("{} is still running on {}, waiting as asked...", pid, self.id);
                    tokio::time::sleep(ctx.settings.exit_poll_interval).await;
                }
                info!("{} has exited on {}", pid, self.id);
                self.process_id = None;
                return Ok(StopOutcome::Stopped);
            }
            if !aborted {
                warn!(
                    "{} is still running on {}; abort to stop it anyway",
                    ctx.plan.binary_name(),
                    self.id
                );
                return Ok(StopOutcome::Refused);
            }
        }

        let command = render_command(&ctx.plan.stop_command_template(), &ctx.template_vars());
        shell.run(&command).await?;
        await_shutdown(shell.as_ref(), ctx, pid).await?;
        self.process_id = None;
        Ok(StopOutcome::Stopped)
    }

    /// Whether the recorded process is alive. Never mutates the agent.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the liveness query.
    pub async fn check_running(&self, ctx: &AgentContext<'_>) -> FleetResult<bool> {
        let Some(pid) = self.process_id else {
            return Ok(false);
        };
        let shell = self.shell(ctx).await?;
        shell.is_process_running(pid).await
    }
}

async fn await_shutdown(
    shell: &dyn RemoteShell,
    ctx: &AgentContext<'_>,
    pid: u32,
) -> FleetResult<()> {
    for _ in 0..ctx.settings.stop_retries {
        if !shell.is_process_running(pid).await? {
            return Ok(());
        }
        tokio::time::sleep(ctx.settings.stop_retry_interval).await;
    }
    if shell.is_process_running(pid).await? {
        warn!("{} on {} did not shut down, terminating", pid, shell.host());
        shell.terminate_process_tree(pid).await?;
    }
    Ok(())
}
