use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{DiagnosticContext, FleetError, FleetResult};

/// Polls a predicate at a constant interval until it holds or the deadline
/// passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    timeout: Duration,
    poll_interval: Duration,
}

impl Waiter {
    #[must_use]
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Waits for `predicate` to return `true`.
    ///
    /// The predicate is evaluated immediately, then once per poll interval.
    /// It is evaluated one last time when the deadline falls inside a sleep,
    /// so a transition that lands just before the deadline is not missed.
    ///
    /// # Errors
    ///
    /// Returns `FleetError::Timeout` carrying `description` and `context` when
    /// the predicate never held, or the predicate's own error.
    pub async fn wait_for<P, Fut>(
        &self,
        description: &str,
        context: &DiagnosticContext,
        mut predicate: P,
    ) -> FleetResult<()>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = FleetResult<bool>>,
    {
        let started = Instant::now();
        let mut polls: u64 = 0;
        loop {
            polls = polls.saturating_add(1);
            if predicate().await? {
                debug!("Done waiting for {} after {} poll(s)", description, polls);
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(FleetError::Timeout {
                    description: description.to_owned(),
                    context: context.clone(),
                });
            }
            let remaining = self.timeout.saturating_sub(elapsed);
            debug!(
                "Still waiting for {} ({}ms left)",
                description,
                remaining.as_millis()
            );
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }
}
