//! CLI layer
//!
//! Command-line interface using clap.

pub mod commands;
pub mod context;
pub mod output;

pub use context::{GlobalFlags, WorkflowContext};
pub use output::Output;
