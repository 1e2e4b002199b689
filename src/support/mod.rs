//! Concurrency primitives shared by clusters and agents.
mod fanout;
mod waiter;


pub use fanout::{run_all, run_all_unit};
pub use waiter::Waiter;
