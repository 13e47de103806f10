//! Validate command implementation

use serde::Serialize;
use std::path::Path;

use crate::cli::context::{locate_workflow, GlobalFlags};
use crate::cli::output::Output;
use crate::core::workflow::Workflow;

#[derive(Serialize)]
struct ValidateJson {
    path: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Validate the workflow file. Returns the process exit code.
pub fn run_validate(
    explicit: Option<&Path>,
    cwd: &Path,
    flags: GlobalFlags,
) -> anyhow::Result<i32> {
    let path = locate_workflow(explicit, cwd)?;
    let result = Workflow::load(&path);

    if flags.json {
        let report = ValidateJson {
            path: path.display().to_string(),
            valid: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if result.is_ok() { 0 } else { 1 });
    }

    match result {
        Ok(workflow) => {
            if !flags.quiet {
                Output::success(&format!("{} is valid", path.display()));
                describe(&workflow);
            }
            Ok(0)
        }
        Err(e) => {
            Output::error(&format!("{}: {}", path.display(), e));
            Ok(1)
        }
    }
}

fn describe(workflow: &Workflow) {
    Output::kv("name", &workflow.name);

    let mut triggers = Vec::new();
    if let Some(ref push) = workflow.triggers.push {
        if push.branches.is_empty() {
            triggers.push("push (any branch)".to_string());
        } else {
            triggers.push(format!("push ({})", push.branches.join(", ")));
        }
    }
    for entry in &workflow.triggers.schedule {
        triggers.push(format!("schedule '{}'", entry.cron));
    }
    if workflow.triggers.manual {
        triggers.push("manual".to_string());
    }
    Output::kv("triggers", &triggers.join(", "));

    if let Some(ref runtime) = workflow.runtime {
        Output::kv("runtime", &format!("{} {}", runtime.interpreter, runtime.version));
    }
    for step in &workflow.setup {
        Output::kv("setup", &step.command);
    }
    Output::kv("run", &workflow.run.command);
    Output::kv("commit label", &workflow.commit.label);

    let branch = workflow.push.branch.as_deref().unwrap_or("<current branch>");
    Output::kv("push", &format!("{} {}", workflow.push.remote, branch));
}
