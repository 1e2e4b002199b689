//! Fleet configuration files: loading, validation and resolution.
mod apply;
mod loader;
mod parse;
pub mod types;


pub use apply::{FleetSetup, apply_config};
pub use loader::{LoadedConfig, load_config};

#[cfg(test)]
pub(crate) use loader::load_config_file;
pub(crate) use parse::parse_duration;
