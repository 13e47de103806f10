//! Status command implementation
//!
//! Shows the last run, recent history, the lease and the next fire time.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::context::WorkflowContext;
use crate::cli::output::{Output, Table};
use crate::core::lock::{current_lease, Lease};
use crate::core::schedule::next_fire;
use crate::core::state::{RunRecord, RunStore};
use crate::git;

const HISTORY_SHOWN: usize = 10;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusJson {
    workflow: String,
    repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_fire: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease: Option<Lease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run: Option<RunRecord>,
    history: Vec<RunRecord>,
}

/// Run the status command
pub fn run_status(ctx: &WorkflowContext) -> anyhow::Result<()> {
    let repo = git::open_repo(ctx.root())?;
    let store = RunStore::new(git::autorun_dir(&repo));

    let last_run = store.last_run()?;
    let history = store.history(HISTORY_SHOWN)?;
    let lease = current_lease(store.dir())?;
    let schedules = ctx.workflow.schedules()?;
    let next = next_fire(&schedules, Utc::now()).map(|(at, _)| at);

    if ctx.flags.json {
        let status = StatusJson {
            workflow: ctx.workflow_path.display().to_string(),
            repository: ctx.root().display().to_string(),
            next_fire: next,
            lease,
            last_run,
            history,
        };
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    Output::header(&format!("Workflow: {}", ctx.workflow.name));
    Output::kv("file", &ctx.workflow_path.display().to_string());
    Output::kv("repository", &ctx.root().display().to_string());
    if let Ok(Some(branch)) = git::current_branch(&repo) {
        Output::kv("branch", &Output::branch_name(&branch));
    }
    match next {
        Some(at) => Output::kv("next fire", &at.format("%Y-%m-%d %H:%M UTC").to_string()),
        None => Output::kv("next fire", "-"),
    }

    if let Some(lease) = lease {
        if lease.is_expired(Utc::now()) {
            Output::warning(&format!(
                "Stale lease from pid {} on {} (expired {}); the next run will take it over",
                lease.pid, lease.host, lease.expires_at
            ));
        } else {
            Output::info(&format!(
                "Run in progress: pid {} on {} since {}",
                lease.pid, lease.host, lease.acquired_at
            ));
        }
    }

    let Some(last) = last_run else {
        println!();
        Output::info("No runs recorded yet");
        return Ok(());
    };

    Output::header("Last run");
    Output::kv("id", &last.run_id);
    Output::kv("trigger", &last.trigger.to_string());
    Output::kv("started", &last.started_at.to_rfc3339());
    Output::kv("status", &Output::status(last.status));
    if let Some(ref id) = last.commit_id {
        Output::kv("commit", &Output::commit_id(id));
    }
    if let Some(ref error) = last.error {
        Output::kv("error", error);
    }
    for step in &last.steps {
        let mark = if step.success { "ok" } else { "FAILED" };
        Output::list_item(&format!(
            "{} [{}] {}",
            step.name,
            mark,
            Output::duration_ms(step.duration_ms)
        ));
    }

    if history.len() > 1 {
        Output::header("Recent runs");
        let mut table = Table::new(vec!["Run", "Trigger", "Status", "Commit"]);
        for run in &history {
            let trigger = run.trigger.kind();
            let status = format!("{:?}", run.status).to_lowercase();
            let commit = run
                .commit_id
                .as_deref()
                .map(|id| id.get(..7).unwrap_or(id))
                .unwrap_or("-");
            table.add_row(vec![&run.run_id, trigger, &status, commit]);
        }
        table.print();
    }

    Ok(())
}
