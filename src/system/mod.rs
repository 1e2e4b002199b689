//! Process-level plumbing for the binary: logging and shutdown signals.
pub mod logger;
pub mod shutdown;
