use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{FleetError, FleetResult};
use crate::remote::{CommandOutput, RemoteAccess, RemoteConnector, RemoteShell};

const FIRST_PID: u32 = 4000;

/// Scripted behaviour of one fake host.
#[derive(Debug, Clone, Default)]
pub(crate) struct HostScript {
    pub unreachable: bool,
    /// Launch commands never produce a process.
    pub start_fails: bool,
    /// The stop command has no effect.
    pub ignores_stop: bool,
    /// Liveness checks that still report a launched process before it exits
    /// on its own.
    pub exits_after_checks: Option<u32>,
    pub tool_missing: bool,
}

#[derive(Debug, Default)]
struct HostState {
    script: HostScript,
    running: Vec<u32>,
    checks_left: Option<u32>,
    commands: Vec<String>,
    directories: Vec<String>,
    uploads: Vec<String>,
    downloads: Vec<String>,
    terminated: Vec<u32>,
    liveness_checks: u32,
}

#[derive(Debug, Default)]
struct Shared {
    hosts: Mutex<HashMap<String, HostState>>,
    events: Mutex<Vec<String>>,
    next_pid: AtomicU32,
}

impl Shared {
    fn hosts(&self) -> FleetResult<MutexGuard<'_, HashMap<String, HostState>>> {
        self.hosts
            .lock()
            .map_err(|_| FleetError::from("fake host table poisoned"))
    }

    fn record(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Connector whose shells act on a shared in-memory host table.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeConnector {
    shared: Arc<Shared>,
}

impl FakeConnector {
    pub(crate) fn script(&self, host: &str, script: HostScript) {
        if let Ok(mut hosts) = self.shared.hosts.lock() {
            hosts.entry(host.to_owned()).or_default().script = script;
        }
    }

    /// Marks `pid` as a running process on `host`.
    pub(crate) fn set_running(&self, host: &str, pid: u32) {
        if let Ok(mut hosts) = self.shared.hosts.lock() {
            let state = hosts.entry(host.to_owned()).or_default();
            state.running.push(pid);
            state.checks_left = state.script.exits_after_checks;
        }
    }

    /// The host's processes exit on their own.
    pub(crate) fn finish(&self, host: &str) {
        if let Ok(mut hosts) = self.shared.hosts.lock() {
            let state = hosts.entry(host.to_owned()).or_default();
            state.running.clear();
            state.checks_left = None;
        }
    }

    fn read<T>(&self, host: &str, view: impl FnOnce(&HostState) -> T) -> Option<T> {
        let hosts = self.shared.hosts.lock().ok()?;
        hosts.get(host).map(view)
    }

    pub(crate) fn commands(&self, host: &str) -> Vec<String> {
        self.read(host, |state| state.commands.clone())
            .unwrap_or_default()
    }

    pub(crate) fn directories(&self, host: &str) -> Vec<String> {
        self.read(host, |state| state.directories.clone())
            .unwrap_or_default()
    }

    pub(crate) fn uploads(&self, host: &str) -> Vec<String> {
        self.read(host, |state| state.uploads.clone())
            .unwrap_or_default()
    }

    pub(crate) fn downloads(&self, host: &str) -> Vec<String> {
        self.read(host, |state| state.downloads.clone())
            .unwrap_or_default()
    }

    pub(crate) fn terminated(&self, host: &str) -> Vec<u32> {
        self.read(host, |state| state.terminated.clone())
            .unwrap_or_default()
    }

    pub(crate) fn liveness_checks(&self, host: &str) -> u32 {
        self.read(host, |state| state.liveness_checks)
            .unwrap_or_default()
    }

    pub(crate) fn is_running(&self, host: &str) -> bool {
        self.read(host, |state| !state.running.is_empty())
            .unwrap_or_default()
    }

    /// Every command on every host, in execution order, as `host: command`.
    pub(crate) fn events(&self) -> Vec<String> {
        self.shared
            .events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    async fn connect(
        &self,
        address: &str,
        access: &RemoteAccess,
    ) -> FleetResult<Box<dyn RemoteShell>> {
        let unreachable = self
            .read(address, |state| state.script.unreachable)
            .unwrap_or_default();
        if unreachable {
            return Err(FleetError::BackendConnectivity {
                host: address.to_owned(),
                user: access.user_name.clone(),
                attempts: 1,
            });
        }
        Ok(Box::new(FakeShell {
            host: address.to_owned(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct FakeShell {
    host: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl RemoteShell for FakeShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> FleetResult<CommandOutput> {
        self.shared.record(format!("{}: {}", self.host, command));
        let mut hosts = self.shared.hosts()?;
        let state = hosts.entry(self.host.clone()).or_default();
        state.commands.push(command.to_owned());

        if command.contains("nohup") && !state.script.start_fails {
            let pid = FIRST_PID.saturating_add(self.shared.next_pid.fetch_add(1, Ordering::SeqCst));
            state.running.push(pid);
            state.checks_left = state.script.exits_after_checks;
        }
        if command.contains("shutdown.sh") && !state.script.ignores_stop {
            state.running.clear();
        }
        if command.starts_with("ls -d") && state.script.tool_missing {
            return Ok(CommandOutput {
                status: 2,
                stdout: String::new(),
                stderr: "No such file or directory".to_owned(),
            });
        }
        Ok(CommandOutput::default())
    }

    async fn find_process_id(&self, _binary_name: &str) -> FleetResult<Option<u32>> {
        let hosts = self.shared.hosts()?;
        Ok(hosts
            .get(&self.host)
            .and_then(|state| state.running.first().copied()))
    }

    async fn is_process_running(&self, pid: u32) -> FleetResult<bool> {
        let mut hosts = self.shared.hosts()?;
        let state = hosts.entry(self.host.clone()).or_default();
        state.liveness_checks = state.liveness_checks.saturating_add(1);
        match state.checks_left {
            Some(0) => {
                state.running.retain(|running| *running != pid);
                state.checks_left = None;
            }
            Some(left) => state.checks_left = Some(left.saturating_sub(1)),
            None => {}
        }
        Ok(state.running.contains(&pid))
    }

    async fn terminate_process_tree(&self, pid: u32) -> FleetResult<()> {
        self.shared.record(format!("{}: terminate {}", self.host, pid));
        let mut hosts = self.shared.hosts()?;
        let state = hosts.entry(self.host.clone()).or_default();
        state.terminated.push(pid);
        state.running.retain(|running| *running != pid);
        Ok(())
    }

    async fn upload_file(&self, _local: &Path, remote: &str) -> FleetResult<()> {
        let mut hosts = self.shared.hosts()?;
        hosts
            .entry(self.host.clone())
            .or_default()
            .uploads
            .push(remote.to_owned());
        Ok(())
    }

    async fn download_file(&self, remote: &str, _local: &Path) -> FleetResult<()> {
        let mut hosts = self.shared.hosts()?;
        hosts
            .entry(self.host.clone())
            .or_default()
            .downloads
            .push(remote.to_owned());
        Ok(())
    }

    async fn make_directory(&self, path: &str) -> FleetResult<()> {
        let mut hosts = self.shared.hosts()?;
        hosts
            .entry(self.host.clone())
            .or_default()
            .directories
            .push(path.to_owned());
        Ok(())
    }
}
