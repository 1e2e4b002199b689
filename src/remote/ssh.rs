//! `RemoteShell` over the system `ssh` and `scp` clients.
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::process_table::{self, RemoteProcess};
use super::{CommandOutput, RemoteAccess, RemoteConnector, RemoteShell};
use crate::error::{FleetError, FleetResult};
use crate::settings::OrchestratorSettings;

/// Signals sent in turn until the process is gone.
const TERMINATION_SIGNALS: [&str; 3] = ["INT", "TERM", "KILL"];
/// Exit status reserved by the ssh client for its own failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const BACKOFF_FACTOR: u32 = 3;

#[derive(Debug, Clone)]
pub struct SshConnector {
    settings: OrchestratorSettings,
}

impl SshConnector {
    #[must_use]
    pub const fn new(settings: OrchestratorSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(
        &self,
        address: &str,
        access: &RemoteAccess,
    ) -> FleetResult<Box<dyn RemoteShell>> {
        let shell = SshShell {
            host: address.to_owned(),
            access: access.clone(),
            doze: self.settings.stop_retry_interval,
        };
        shell
            .ensure_connection(self.settings.connect_attempts, self.settings.connect_backoff)
            .await?;
        Ok(Box::new(shell))
    }
}

#[derive(Debug, Clone)]
pub struct SshShell {
    host: String,
    access: RemoteAccess,
    doze: Duration,
}

impl SshShell {
    /// Probes the host until it answers, tripling the pause between attempts.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::BackendConnectivity` once every attempt failed.
    pub async fn ensure_connection(&self, attempts: u32, backoff: Duration) -> FleetResult<()> {
        let attempts = attempts.max(1);
        let mut pause = backoff;
        for attempt in 1..=attempts {
            match self.run("true").await {
                Ok(output) if output.status != SSH_TRANSPORT_FAILURE => return Ok(()),
                Ok(output) => {
                    debug!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt,
                        attempts,
                        self.host,
                        output.stderr.trim()
                    );
                }
                Err(err) => {
                    debug!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt, attempts, self.host, err
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(pause).await;
                pause = pause.saturating_mul(BACKOFF_FACTOR);
            }
        }
        Err(FleetError::BackendConnectivity {
            host: self.host.clone(),
            user: self.access.user_name.clone(),
            attempts,
        })
    }

    async fn remote_processes(&self) -> FleetResult<Vec<RemoteProcess>> {
        let listing = self
            .run(&process_table::listing_command(&self.access.user_name))
            .await?
            .checked(&self.host)?;
        Ok(process_table::parse(&listing))
    }

    async fn terminate_process(&self, pid: u32) -> FleetResult<()> {
        for signal in TERMINATION_SIGNALS {
            if !self.is_process_running(pid).await? {
                return Ok(());
            }
            debug!("Sending SIG{} to {} on {}", signal, pid, self.host);
            self.run(&format!("kill -{} {}", signal, pid)).await?;
            tokio::time::sleep(self.doze).await;
        }
        if self.is_process_running(pid).await? {
            warn!("Process {} on {} survived SIGKILL", pid, self.host);
            return Err(FleetError::RemoteCommand {
                host: self.host.clone(),
                status: -1,
                stderr: format!("process {} is still running after SIGKILL", pid),
            });
        }
        Ok(())
    }

    async fn execute(&self, program: &str, args: Vec<String>) -> FleetResult<CommandOutput> {
        let output = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| FleetError::io(format!("{} to {}", program, self.host), err))?;
        Ok(command_output(output))
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> FleetResult<CommandOutput> {
        debug!("ssh {}: {}", self.host, command);
        self.execute("ssh", ssh_args(&self.host, &self.access, command))
            .await
    }

    async fn find_process_id(&self, binary_name: &str) -> FleetResult<Option<u32>> {
        let processes = self.remote_processes().await?;
        Ok(process_table::find_by_command(&processes, binary_name))
    }

    async fn is_process_running(&self, pid: u32) -> FleetResult<bool> {
        let processes = self.remote_processes().await?;
        Ok(process_table::contains_pid(&processes, pid))
    }

    async fn terminate_process_tree(&self, pid: u32) -> FleetResult<()> {
        let processes = self.remote_processes().await?;
        for target in process_table::termination_order(&processes, pid) {
            self.terminate_process(target).await?;
        }
        Ok(())
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> FleetResult<()> {
        debug!("uploading {} -> {}:{}", local.display(), self.host, remote);
        let target = format!("{}@{}:{}", self.access.user_name, self.host, remote);
        self.execute("scp", scp_args(&self.access, &local.display().to_string(), &target))
            .await?
            .checked(&self.host)
            .map(|_| ())
    }

    async fn download_file(&self, remote: &str, local: &Path) -> FleetResult<()> {
        debug!("downloading {}:{} -> {}", self.host, remote, local.display());
        let source = format!("{}@{}:{}", self.access.user_name, self.host, remote);
        self.execute("scp", scp_args(&self.access, &source, &local.display().to_string()))
            .await?
            .checked(&self.host)
            .map(|_| ())
    }

    async fn make_directory(&self, path: &str) -> FleetResult<()> {
        let quoted = shell_quote(path);
        self.run(&format!("[ -d {quoted} ] || mkdir {quoted}"))
            .await?
            .checked(&self.host)
            .map(|_| ())
    }
}

fn command_output(output: Output) -> CommandOutput {
    CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

fn common_options(access: &RemoteAccess) -> Vec<String> {
    let mut args = vec![
        "-o".to_owned(),
        "BatchMode=yes".to_owned(),
        "-o".to_owned(),
        "StrictHostKeyChecking=no".to_owned(),
        "-o".to_owned(),
        format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
    ];
    if let Some(identity) = access.identity_file.as_ref() {
        args.push("-i".to_owned());
        args.push(identity.display().to_string());
    }
    args
}

pub(crate) fn ssh_args(host: &str, access: &RemoteAccess, command: &str) -> Vec<String> {
    let mut args = common_options(access);
    args.push("-p".to_owned());
    args.push(access.port.to_string());
    args.push(format!("{}@{}", access.user_name, host));
    args.push(command.to_owned());
    args
}

pub(crate) fn scp_args(access: &RemoteAccess, source: &str, target: &str) -> Vec<String> {
    let mut args = common_options(access);
    args.push("-P".to_owned());
    args.push(access.port.to_string());
    args.push(source.to_owned());
    args.push(target.to_owned());
    args
}

/// Single-quotes `value` for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
