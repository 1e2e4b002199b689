//! Command-line arguments for the `loadfleet` binary.
mod cli;
pub(crate) mod parsers;


pub use cli::{Command, FleetArgs, RunArgs};
