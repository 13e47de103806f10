//! Check-trigger command implementation
//!
//! `autorun check-trigger --event <kind>` answers whether the workflow
//! would run for an event: exit 0 for yes, 1 for no.

use serde::Serialize;

use crate::cli::commands::run::resolve_trigger;
use crate::cli::context::WorkflowContext;
use crate::cli::output::Output;
use crate::core::trigger::{EventKind, TriggerEvent};

#[derive(Serialize)]
struct CheckJson<'a> {
    event: &'a TriggerEvent,
    matches: bool,
}

/// Returns the process exit code.
pub fn run_check_trigger(
    ctx: &WorkflowContext,
    event: EventKind,
    branch: Option<String>,
) -> anyhow::Result<i32> {
    let trigger = resolve_trigger(ctx.root(), Some(event), branch)?;
    let matches = ctx.workflow.should_run(&trigger);

    if ctx.flags.json {
        let result = CheckJson {
            event: &trigger,
            matches,
        };
        println!("{}", serde_json::to_string(&result)?);
    } else if !ctx.flags.quiet {
        if matches {
            Output::success(&format!("{} triggers '{}'", trigger, ctx.workflow.name));
        } else {
            Output::info(&format!("{} does not trigger '{}'", trigger, ctx.workflow.name));
        }
    }

    Ok(if matches { 0 } else { 1 })
}
