//! Tunables for every wait, poll, and retry the orchestrator performs.
//!
//! A single `OrchestratorSettings` value is built once (from defaults or the
//! config file) and handed to the coordinator at construction; nothing in the
//! core reads process-wide state.
use std::time::Duration;

/// Seconds between successive backend status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound for any single backend state transition.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
/// Liveness checks after a graceful stop before forcing termination.
pub const DEFAULT_STOP_RETRIES: u32 = 3;
pub const DEFAULT_STOP_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Interval for re-checking a test that is allowed to finish on its own.
pub const DEFAULT_EXIT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Environment variable that stretches backend wait timeouts (seconds).
pub const WAIT_TIMEOUT_ENV: &str = "LOADFLEET_WAIT_TIMEOUT_SECS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_retries: u32,
    pub stop_retry_interval: Duration,
    pub exit_poll_interval: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_retries: DEFAULT_STOP_RETRIES,
            stop_retry_interval: DEFAULT_STOP_RETRY_INTERVAL,
            exit_poll_interval: DEFAULT_EXIT_POLL_INTERVAL,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
        }
    }
}

impl OrchestratorSettings {
    /// Applies `LOADFLEET_WAIT_TIMEOUT_SECS` when it holds a positive integer.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let override_secs = std::env::var(WAIT_TIMEOUT_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok());
        self.with_wait_timeout_override(override_secs)
    }

    pub(crate) fn with_wait_timeout_override(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs.filter(|value| *value > 0) {
            self.wait_timeout = Duration::from_secs(secs);
        }
        self
    }

    #[must_use]
    pub const fn waiter(&self) -> crate::support::Waiter {
        crate::support::Waiter::new(self.wait_timeout, self.poll_interval)
    }
}
