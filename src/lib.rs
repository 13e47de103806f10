//! autorun - Scheduled fetch-and-commit runner
//!
//! Runs a data-producing command inside a git working tree on a cron
//! schedule (or on demand), then commits whatever it changed under a fixed
//! label and pushes the result, retrying when the remote moved underneath.

pub mod cli;
pub mod core;
pub mod git;
pub mod telemetry;
pub mod util;

pub use core::runner::{RunError, RunOutcome, Runner};
pub use core::workflow::Workflow;
