use std::fmt;

use super::FleetError;

/// Every failure raised by one fan-out, in the order the workers finished.
#[derive(Debug, Default)]
pub struct AggregatedFailure {
    failures: Vec<FleetError>,
}

impl AggregatedFailure {
    #[must_use]
    pub const fn new(failures: Vec<FleetError>) -> Self {
        Self { failures }
    }

    pub(crate) fn push(&mut self, failure: FleetError) {
        self.failures.push(failure);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FleetError> {
        self.failures.iter()
    }

    /// True when the aggregate is non-empty and every root cause matches.
    pub fn all<P>(&self, mut predicate: P) -> bool
    where
        P: FnMut(&FleetError) -> bool,
    {
        !self.failures.is_empty() && self.failures.iter().all(|failure| predicate(failure.root()))
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<FleetError> {
        self.failures
    }

    /// A lone failure is returned as itself; anything else stays aggregated.
    #[must_use]
    pub fn into_error(mut self) -> FleetError {
        if self.failures.len() == 1
            && let Some(failure) = self.failures.pop()
        {
            return failure;
        }
        FleetError::Aggregated(self)
    }
}

impl fmt::Display for AggregatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} concurrent operation(s) failed:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedFailure {}

impl<'failure> IntoIterator for &'failure AggregatedFailure {
    type Item = &'failure FleetError;
    type IntoIter = std::slice::Iter<'failure, FleetError>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.iter()
    }
}

impl From<AggregatedFailure> for FleetError {
    fn from(value: AggregatedFailure) -> Self {
        FleetError::Aggregated(value)
    }
}
