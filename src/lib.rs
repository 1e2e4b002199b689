//! Orchestration of distributed load-generating agents.
//!
//! A `ClusterCoordinator` reconciles the clusters a project wants against the
//! ones it has, provisions agents on each backend (cloud instances or
//! data-center machines), and starts and stops the load generator on every
//! agent in topology order. The `loadfleet` binary drives it from a config
//! file; the library API accepts any `RemoteConnector` and `CloudProvider`.
pub mod agent;
pub mod app;
pub mod args;
pub mod cluster;
pub mod config;
pub mod error;
pub mod plan;
pub mod remote;
pub mod settings;
pub mod support;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;
