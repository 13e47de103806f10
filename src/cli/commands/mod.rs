//! CLI command implementations
//!
//! Each command is implemented in its own module.

pub mod check_trigger;
pub mod commit;
pub mod init;
pub mod next;
pub mod run;
pub mod schedule;
pub mod status;
pub mod validate;
