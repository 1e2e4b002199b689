use std::fmt;

use thiserror::Error;

use super::AggregatedFailure;

/// Ordered key/value pairs attached to a timeout so an operator can find the
/// resource that never converged (region, instance id, host, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticContext {
    entries: Vec<(String, String)>,
}

impl DiagnosticContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entries.push((key.to_owned(), value.into()));
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str("{}");
        }
        f.write_str("{")?;
        for (idx, (key, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Timeout while waiting for {description}: {context}.")]
    Timeout {
        description: String,
        context: DiagnosticContext,
    },
    #[error(
        "Could not start {binary} on agent {agent} ({address}): no process id found after launch."
    )]
    ProcessStartFailure {
        agent: String,
        address: String,
        binary: String,
    },
    #[error("Could not reach {user}@{host} after {attempts} attempt(s).")]
    BackendConnectivity {
        host: String,
        user: String,
        attempts: u32,
    },
    #[error("Remote command on {host} exited with status {status}: {stderr}")]
    RemoteCommand {
        host: String,
        status: i32,
        stderr: String,
    },
    #[error("One or more agents in {cluster} could not be prepared for load generation: {reason}")]
    AgentCreation { cluster: String, reason: String },
    #[error(
        "Master/slave mode was switched on for plan '{plan}' in {cluster} while flat agents exist. Terminate and set up again."
    )]
    MasterSlaveSwitchOn { cluster: String, plan: String },
    #[error(
        "Master/slave mode was switched off for plan '{plan}' in {cluster} while slave agents exist. Terminate and set up again."
    )]
    MasterSlaveSwitchOff { cluster: String, plan: String },
    #[error("Agent {agent} has no network address.")]
    MissingAddress { agent: String },
    #[error("Load generator not found at {path} on {host}.")]
    ToolMissing { host: String, path: String },
    #[error("{cluster} is inactive but {running} agent(s) are still generating load.")]
    InactiveClusterHasRunningAgents { cluster: String, running: usize },
    #[error(
        "Project {project} has already started an execution cycle. Stop or abort it before generating load again."
    )]
    ExecutionInProgress { project: String },
    #[error("Unknown test plan '{plan}'.")]
    UnknownPlan { plan: String },
    #[error("Cloud provider error in {cluster}: {message}")]
    Provider { cluster: String, message: String },
    #[error("{cluster} uses the {backend} backend, which is not available here: {reason}")]
    UnsupportedBackend {
        cluster: String,
        backend: &'static str,
        reason: String,
    },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cluster {cluster}: {source}")]
    InCluster {
        cluster: String,
        #[source]
        source: Box<FleetError>,
    },
    #[error("{0}")]
    Aggregated(AggregatedFailure),
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}

pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    /// Attaches the cluster code so fan-out failures stay attributable.
    #[must_use]
    pub fn in_cluster(self, cluster: &str) -> Self {
        FleetError::InCluster {
            cluster: cluster.to_owned(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any cluster attribution.
    #[must_use]
    pub fn root(&self) -> &FleetError {
        let mut current = self;
        while let FleetError::InCluster { source, .. } = current {
            current = source;
        }
        current
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, FleetError::Timeout { .. })
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FleetError::Io {
            context: context.into(),
            source,
        }
    }
}
