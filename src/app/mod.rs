//! What the binary's subcommands do, on top of the library API.
mod check;
mod run;


pub use check::describe_setup;
pub use run::{RunSummary, finish_fleet, run_fleet, start_fleet};
