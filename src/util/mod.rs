//! Utility functions and helpers

pub mod cmd;
pub mod retry;

pub use cmd::{log_cmd, run_shell, ShellOutput};
pub use retry::{retry_blocking_with_backoff, RetryOptions};
