//! Remote execution over a per-host shell.
//!
//! The orchestrator never speaks a transport protocol itself. Everything it
//! needs from a worker host is expressed through `RemoteShell`, and a
//! `RemoteConnector` hands out one shell per address.
mod access;
pub mod process_table;
pub mod ssh;


use std::path::Path;

use async_trait::async_trait;

use crate::error::{FleetError, FleetResult};

pub use access::RemoteAccess;
pub use process_table::RemoteProcess;
pub use ssh::SshConnector;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }

    /// Converts a non-zero exit status into `FleetError::RemoteCommand`.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::RemoteCommand` when the command failed.
    pub fn checked(self, host: &str) -> FleetResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(FleetError::RemoteCommand {
                host: host.to_owned(),
                status: self.status,
                stderr: self.stderr.trim().to_owned(),
            })
        }
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Address this shell is connected to.
    fn host(&self) -> &str;

    /// Runs `command` and returns its output. A non-zero exit status is not an
    /// error at this layer.
    async fn run(&self, command: &str) -> FleetResult<CommandOutput>;

    /// Process id of the first process whose command line contains
    /// `binary_name`, if any.
    async fn find_process_id(&self, binary_name: &str) -> FleetResult<Option<u32>>;

    async fn is_process_running(&self, pid: u32) -> FleetResult<bool>;

    /// Terminates `pid` and all of its descendants, children first.
    async fn terminate_process_tree(&self, pid: u32) -> FleetResult<()>;

    async fn upload_file(&self, local: &Path, remote: &str) -> FleetResult<()>;

    async fn download_file(&self, remote: &str, local: &Path) -> FleetResult<()>;

    /// Creates `path` unless it already exists. Parents must exist.
    async fn make_directory(&self, path: &str) -> FleetResult<()>;
}

#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Opens a shell to `address`.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::BackendConnectivity` when the host cannot be
    /// reached with the given access.
    async fn connect(
        &self,
        address: &str,
        access: &RemoteAccess,
    ) -> FleetResult<Box<dyn RemoteShell>>;
}
