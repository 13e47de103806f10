//! Run command implementation
//!
//! `autorun run` executes the workflow once, in the foreground.

use indicatif::ProgressBar;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::context::WorkflowContext;
use crate::cli::output::Output;
use crate::core::runner::{RunError, RunObserver, RunOutcome, Runner};
use crate::core::state::{RunStatus, StepRecord};
use crate::core::trigger::{EventKind, TriggerEvent};
use crate::core::workflow::StepConfig;
use crate::git;

/// Options for `autorun run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Event to run as; manual when not given
    pub event: Option<EventKind>,
    /// Branch for a push event
    pub branch: Option<String>,
    /// Run even with uncommitted changes
    pub allow_dirty: bool,
}

/// Prints spinners and step results while the runner works
struct ProgressObserver {
    spinner: Option<ProgressBar>,
    verbose: bool,
}

impl ProgressObserver {
    fn new(verbose: bool) -> Self {
        Self {
            spinner: None,
            verbose,
        }
    }

    fn start(&mut self, message: &str) {
        self.clear();
        self.spinner = Some(Output::spinner(message));
    }

    fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl RunObserver for ProgressObserver {
    fn phase(&mut self, name: &str) {
        self.start(&format!("{}...", name));
    }

    fn phase_done(&mut self, name: &str, detail: &str) {
        self.clear();
        Output::success(&format!("{}: {}", name, detail));
    }

    fn step_started(&mut self, step: &StepConfig) {
        self.start(&format!("Running: {}...", step.name));
    }

    fn step_finished(&mut self, record: &StepRecord) {
        self.clear();
        let took = Output::duration_ms(record.duration_ms);
        if record.success {
            Output::success(&format!("{}: passed ({})", record.name, took));
        } else {
            let code = record
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Output::error(&format!("{}: FAILED (exit {}, {})", record.name, code, took));
        }
        if (self.verbose || !record.success) && !record.output.is_empty() {
            Output::captured(&record.output);
        }
    }
}

impl Drop for ProgressObserver {
    fn drop(&mut self) {
        self.clear();
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunFailureJson<'a> {
    status: RunStatus,
    failure_kind: &'a str,
    error: String,
    exit_code: i32,
}

/// Resolve the trigger event for a run.
///
/// A push event without `--branch` uses the checked-out branch.
pub fn resolve_trigger(
    repo_root: &Path,
    event: Option<EventKind>,
    branch: Option<String>,
) -> anyhow::Result<TriggerEvent> {
    Ok(match event.unwrap_or(EventKind::Manual) {
        EventKind::Manual => TriggerEvent::Manual,
        EventKind::Schedule => TriggerEvent::Schedule,
        EventKind::Push => {
            let branch = match branch {
                Some(b) => b,
                None => {
                    let repo = git::open_repo(repo_root)?;
                    git::current_branch(&repo)?.ok_or_else(|| {
                        anyhow::anyhow!("HEAD is detached; pass --branch for a push event")
                    })?
                }
            };
            TriggerEvent::Push { branch }
        }
    })
}

/// Clone `url` for `run --clone` and return the checkout directory.
pub fn clone_for_run(url: &str, dir: Option<&Path>, cwd: &Path) -> anyhow::Result<PathBuf> {
    let target = match dir {
        Some(d) if d.is_absolute() => d.to_path_buf(),
        Some(d) => cwd.join(d),
        None => cwd.join(repo_dir_name(url)),
    };

    if target.exists() && git::is_git_repo(&target) {
        tracing::info!(path = %target.display(), "Reusing existing checkout");
        return Ok(target);
    }

    git::clone_repo(url, &target, None)?;
    Ok(target)
}

/// Directory name `git clone` would pick for `url`.
fn repo_dir_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed
        .rsplit(|c: char| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

/// Run the workflow once. Returns the process exit code.
pub fn run_run(ctx: &WorkflowContext, options: RunOptions) -> anyhow::Result<i32> {
    let trigger = resolve_trigger(ctx.root(), options.event, options.branch)?;
    let runner = Runner::new(ctx.workflow.clone(), ctx.root())
        .trigger(trigger)
        .allow_dirty(options.allow_dirty);

    if ctx.flags.interactive() {
        Output::header(&format!("Running workflow: {}", ctx.workflow.name));
        Output::kv("repository", &ctx.root().display().to_string());
        Output::kv("trigger", &runner.trigger_event().to_string());
        println!();
    }

    let result = if ctx.flags.interactive() {
        let mut observer = ProgressObserver::new(ctx.flags.verbose);
        runner.run_with(&mut observer)
    } else {
        runner.run()
    };

    match result {
        Ok(outcome) => {
            report_outcome(ctx, &outcome)?;
            Ok(0)
        }
        Err(e) => report_failure(ctx, &e),
    }
}

fn report_outcome(ctx: &WorkflowContext, outcome: &RunOutcome) -> anyhow::Result<()> {
    if ctx.flags.json {
        println!("{}", serde_json::to_string_pretty(&outcome.record)?);
        return Ok(());
    }
    if ctx.flags.quiet {
        return Ok(());
    }

    println!();
    match outcome.status() {
        RunStatus::Skipped => {
            Output::warning(&format!(
                "Trigger '{}' does not match the workflow; nothing ran",
                outcome.record.trigger
            ));
        }
        _ => {
            let commit = match outcome.commit_id() {
                Some(id) => format!("commit {}", Output::commit_id(id)),
                None => "no changes".to_string(),
            };
            let push = if outcome.pushed() { ", pushed" } else { "" };
            Output::success(&format!("Run succeeded: {}{}", commit, push));
        }
    }
    Ok(())
}

fn report_failure(ctx: &WorkflowContext, error: &RunError) -> anyhow::Result<i32> {
    let exit_code = error.exit_code();

    if ctx.flags.json {
        let failure = RunFailureJson {
            status: RunStatus::Failed,
            failure_kind: error.kind(),
            error: error.to_string(),
            exit_code,
        };
        println!("{}", serde_json::to_string_pretty(&failure)?);
    } else {
        Output::error(&format!("Run failed: {}", error));
    }

    Ok(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_dir_name() {
        assert_eq!(repo_dir_name("https://github.com/acme/pixiv-top10.git"), "pixiv-top10");
        assert_eq!(repo_dir_name("git@github.com:acme/data.git"), "data");
        assert_eq!(repo_dir_name("file:///srv/git/data/"), "data");
        assert_eq!(repo_dir_name(""), "repo");
    }

    #[test]
    fn test_resolve_trigger_defaults_to_manual() {
        let temp = tempfile::TempDir::new().unwrap();
        assert_eq!(
            resolve_trigger(temp.path(), None, None).unwrap(),
            TriggerEvent::Manual
        );
        assert_eq!(
            resolve_trigger(temp.path(), Some(EventKind::Push), Some("dev".to_string())).unwrap(),
            TriggerEvent::Push {
                branch: "dev".to_string()
            }
        );
    }
}
