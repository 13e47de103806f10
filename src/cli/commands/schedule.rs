//! Schedule command implementation
//!
//! `autorun schedule` is a foreground daemon: sleep until the next cron
//! fire, run the workflow with a `schedule` trigger, repeat. Ctrl-C stops
//! it between runs. `--once` waits for one fire, runs, and exits with that
//! run's status.

use chrono::Utc;
use std::path::Path;

use crate::cli::context::WorkflowContext;
use crate::core::runner::Runner;
use crate::core::schedule::{next_fire, CronSchedule};
use crate::core::trigger::TriggerEvent;
use crate::core::workflow::Workflow;

/// Run the schedule daemon. Returns the process exit code.
pub async fn run_schedule(ctx: WorkflowContext, once: bool) -> anyhow::Result<i32> {
    let WorkflowContext {
        workflow_path,
        repo_root,
        mut workflow,
        ..
    } = ctx;

    let mut schedules = schedules_of(&workflow)?;
    tracing::info!(
        workflow = %workflow.name,
        repo = %repo_root.display(),
        crons = ?schedules.iter().map(CronSchedule::as_str).collect::<Vec<_>>(),
        "Scheduler started"
    );

    loop {
        let now = Utc::now();
        let (fire_at, schedule) = next_fire(&schedules, now)
            .map(|(at, s)| (at, s.as_str().to_string()))
            .ok_or_else(|| anyhow::anyhow!("No schedule in the workflow will ever fire"))?;

        let wait = (fire_at - now).to_std().unwrap_or_default();
        tracing::info!(%fire_at, cron = %schedule, wait_secs = wait.as_secs(), "Waiting for next fire");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Scheduler stopped");
                return Ok(0);
            }
            _ = tokio::time::sleep(wait) => {}
        }

        // Pick up edits to the workflow file between runs
        if let Some(reloaded) = reload(&workflow_path, &workflow) {
            match schedules_of(&reloaded) {
                Ok(s) => {
                    schedules = s;
                    workflow = reloaded;
                }
                Err(e) => tracing::warn!(error = %e, "Keeping previous workflow"),
            }
        }

        let exit_code = fire(&workflow, &repo_root).await;
        if once {
            return Ok(exit_code);
        }
    }
}

/// Run one scheduled execution to completion; failures are logged, not fatal.
async fn fire(workflow: &Workflow, repo_root: &Path) -> i32 {
    let runner = Runner::new(workflow.clone(), repo_root.to_path_buf()).trigger(TriggerEvent::Schedule);

    match tokio::task::spawn_blocking(move || runner.run()).await {
        Ok(Ok(outcome)) => {
            tracing::info!(
                run_id = %outcome.record.run_id,
                commit = outcome.commit_id().unwrap_or("none"),
                pushed = outcome.pushed(),
                "Scheduled run finished"
            );
            0
        }
        Ok(Err(e)) => {
            tracing::error!(kind = e.kind(), error = %e, "Scheduled run failed");
            e.exit_code()
        }
        Err(e) => {
            tracing::error!(error = %e, "Scheduled run panicked");
            1
        }
    }
}

fn schedules_of(workflow: &Workflow) -> anyhow::Result<Vec<CronSchedule>> {
    let schedules = workflow.schedules()?;
    if schedules.is_empty() {
        anyhow::bail!("Workflow '{}' has no schedule trigger", workflow.name);
    }
    Ok(schedules)
}

/// Reload the workflow if the file changed and still parses.
fn reload(path: &Path, current: &Workflow) -> Option<Workflow> {
    match Workflow::load(path) {
        Ok(workflow) if &workflow != current => {
            tracing::info!(path = %path.display(), "Workflow changed, reloaded");
            Some(workflow)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Workflow reload failed, keeping previous");
            None
        }
    }
}
