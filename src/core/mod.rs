//! Core business logic for autorun

pub mod lock;
pub mod runner;
pub mod runtime;
pub mod schedule;
pub mod state;
pub mod trigger;
pub mod workflow;
pub mod workflow_paths;

pub use runner::Runner;
pub use schedule::CronSchedule;
pub use state::RunRecord;
pub use workflow::Workflow;
