use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::{Artifact, DirectoryTree, TestPlanDescriptor};
use crate::error::ConfigError;

pub const JMETER_BINARY: &str = "jmeter";
const PLAN_EXTENSION: &str = "jmx";
const RESULT_EXTENSION: &str = "jtl";
const SLAVE_SERVER_PORT: u16 = 1099;
const APP_DIR: &str = "app";
const LOG_DIR: &str = "log";
const SLAVE_LOG_FILE: &str = "server.log";
const DETACHED: &str = "1>/dev/null 2>&1 </dev/null &";

/// A JMeter plan plus the properties it is launched with.
///
/// Remote paths are laid out under `<project>/app` (plan and data files) and
/// `<project>/log` (results) inside the login user's home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlan {
    id: String,
    project: String,
    content_hash: String,
    artifacts: Vec<Artifact>,
    properties: BTreeMap<String, String>,
    thread_properties: BTreeMap<String, u32>,
    serialize_thread_groups: bool,
    loops_forever: bool,
}

impl TestPlan {
    /// Builds a plan from its file content. `id` is the plan path below the
    /// application directory, without the `.jmx` extension.
    #[must_use]
    pub fn new(project: &str, id: &str, plan_content: &[u8]) -> Self {
        Self {
            id: id.to_owned(),
            project: project.to_owned(),
            content_hash: hex::encode(Sha256::digest(plan_content)),
            artifacts: Vec::new(),
            properties: BTreeMap::new(),
            thread_properties: BTreeMap::new(),
            serialize_thread_groups: false,
            loops_forever: false,
        }
    }

    /// Reads `<app_root>/<id>.jmx` and registers it as the first artifact.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadArtifact` when the plan file cannot be read.
    pub fn load(project: &str, id: &str, app_root: &Path) -> Result<Self, ConfigError> {
        let relative = format!("{}.{}", id, PLAN_EXTENSION);
        let local = app_root.join(&relative);
        let content = std::fs::read(&local).map_err(|source| ConfigError::ReadArtifact {
            path: local.clone(),
            source,
        })?;
        Ok(Self::new(project, id, &content).with_artifact(local, &relative))
    }

    /// Adds a file to upload. `relative` is its path below the application
    /// directory.
    #[must_use]
    pub fn with_artifact(mut self, local: PathBuf, relative: &str) -> Self {
        let remote = format!("{}/{}", self.app_dir(), relative.trim_start_matches('/'));
        self.artifacts.push(Artifact { local, remote });
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_owned(), value.to_owned());
        self
    }

    /// Adds a property holding a thread-group size. Its value is split across
    /// the agents that share the plan.
    #[must_use]
    pub fn with_thread_property(mut self, name: &str, threads: u32) -> Self {
        self.properties.insert(name.to_owned(), threads.to_string());
        self.thread_properties.insert(name.to_owned(), threads);
        self
    }

    #[must_use]
    pub const fn serialize_thread_groups(mut self, serialize: bool) -> Self {
        self.serialize_thread_groups = serialize;
        self
    }

    #[must_use]
    pub const fn looping(mut self, loops_forever: bool) -> Self {
        self.loops_forever = loops_forever;
        self
    }

    fn app_dir(&self) -> String {
        format!("{}/{}", self.project, APP_DIR)
    }

    fn log_dir(&self) -> String {
        format!("{}/{}", self.project, LOG_DIR)
    }

    fn remote_plan(&self) -> String {
        format!("{}/{}.{}", self.app_dir(), self.id, PLAN_EXTENSION)
    }

    fn working_dir(&self) -> String {
        match self.id.rsplit_once('/') {
            Some((parent, _)) => format!("{}/{}", self.app_dir(), parent),
            None => self.app_dir(),
        }
    }

    fn property_options(&self, agent_count: u32) -> Vec<String> {
        self.properties
            .iter()
            .map(|(name, value)| match self.thread_properties.get(name) {
                Some(threads) => {
                    format!("-J\"{}={}\"", name, threads_per_agent(*threads, agent_count))
                }
                None => format!("-J\"{}={}\"", name, value),
            })
            .collect()
    }
}

/// Rounded share of `threads` for one of `agent_count` agents, never below 1.
fn threads_per_agent(threads: u32, agent_count: u32) -> u32 {
    let agents = u64::from(agent_count.max(1));
    let share = u64::from(threads)
        .saturating_mul(2)
        .saturating_add(agents)
        .checked_div(agents.saturating_mul(2))
        .unwrap_or(u64::from(threads));
    u32::try_from(share).unwrap_or(u32::MAX).max(1)
}

impl TestPlanDescriptor for TestPlan {
    fn id(&self) -> &str {
        &self.id
    }

    fn num_threads(&self) -> u32 {
        let counts = self.thread_properties.values().copied();
        if self.serialize_thread_groups {
            counts.max().unwrap_or(0)
        } else {
            counts.fold(0_u32, u32::saturating_add)
        }
    }

    fn content_hash(&self) -> &str {
        &self.content_hash
    }

    fn remote_directory_layout(&self) -> DirectoryTree {
        let mut tree = DirectoryTree::new();
        tree.insert_path(&self.log_dir());
        tree.insert_path(&self.working_dir());
        for artifact in &self.artifacts {
            if let Some((parent, _)) = artifact.remote.rsplit_once('/') {
                tree.insert_path(parent);
            }
        }
        tree
    }

    fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    fn binary_name(&self) -> &str {
        JMETER_BINARY
    }

    fn master_command_template(
        &self,
        master_address: &str,
        slave_addresses: &[String],
        agent_count: u32,
    ) -> String {
        let mut parts = vec![
            "nohup".to_owned(),
            format!("{{{{tool_home}}}}/bin/{}", JMETER_BINARY),
            "-n".to_owned(),
            format!("-t {{{{user_home}}}}/{}", self.remote_plan()),
            format!("-l {{{{user_home}}}}/{}", self.remote_result_file()),
        ];
        if slave_addresses.is_empty() {
            parts.extend(self.property_options(agent_count));
        } else {
            parts.push(format!("-R {}", slave_addresses.join(",")));
            parts.push(format!("-Djava.rmi.server.hostname={}", master_address));
            parts.push("-X".to_owned());
        }
        parts.push(DETACHED.to_owned());
        parts.join(" ")
    }

    fn slave_command_template(&self, slave_address: &str, agent_count: u32) -> String {
        let mut parts = vec![
            format!("cd {{{{user_home}}}}/{};", self.working_dir()),
            "nohup".to_owned(),
            format!("{{{{tool_home}}}}/bin/{}", JMETER_BINARY),
            format!("-Dserver_port={} -s", SLAVE_SERVER_PORT),
            format!("-Djava.rmi.server.hostname={}", slave_address),
            format!("-j {{{{user_home}}}}/{}/{}", self.log_dir(), SLAVE_LOG_FILE),
        ];
        parts.extend(self.property_options(agent_count));
        parts.push(DETACHED.to_owned());
        parts.join(" ")
    }

    fn stop_command_template(&self) -> String {
        "{{tool_home}}/bin/shutdown.sh".to_owned()
    }

    fn loops_forever(&self) -> bool {
        self.loops_forever
    }

    fn remote_result_file(&self) -> String {
        format!(
            "{}/results-{}.{}",
            self.log_dir(),
            self.id.replace('/', "-"),
            RESULT_EXTENSION
        )
    }
}
