mod aggregate;
mod app;
mod config;
mod fleet;
mod validation;

#[cfg(test)]
mod test_support;

pub use aggregate::AggregatedFailure;
pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use fleet::{DiagnosticContext, FleetError, FleetResult};
pub use validation::ValidationError;
