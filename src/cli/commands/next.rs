//! Next command implementation
//!
//! `autorun next` lists upcoming scheduled fire times (UTC).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::context::WorkflowContext;
use crate::cli::output::{Output, Table};
use crate::core::schedule::{next_fire, CronSchedule};

#[derive(Debug, Serialize)]
struct FireJson {
    at: DateTime<Utc>,
    cron: String,
}

/// Print the next `count` fire times across all of the workflow's schedules
pub fn run_next(
    ctx: &WorkflowContext,
    count: usize,
    after: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let schedules = ctx.workflow.schedules()?;
    let fires = upcoming(&schedules, after.unwrap_or_else(Utc::now), count);

    if ctx.flags.json {
        println!("{}", serde_json::to_string_pretty(&fires)?);
        return Ok(());
    }

    if schedules.is_empty() {
        Output::info("Workflow has no schedule trigger");
        return Ok(());
    }
    if fires.is_empty() {
        Output::warning("No schedule will ever fire");
        return Ok(());
    }

    let mut table = Table::new(vec!["Fire time (UTC)", "Cron"]);
    for fire in &fires {
        let at = fire.at.format("%Y-%m-%d %H:%M").to_string();
        table.add_row(vec![&at, &fire.cron]);
    }
    table.print();

    Ok(())
}

fn upcoming(schedules: &[CronSchedule], after: DateTime<Utc>, count: usize) -> Vec<FireJson> {
    let mut fires = Vec::with_capacity(count);
    let mut cursor = after;
    while fires.len() < count {
        match next_fire(schedules, cursor) {
            Some((at, schedule)) => {
                fires.push(FireJson {
                    at,
                    cron: schedule.as_str().to_string(),
                });
                cursor = at;
            }
            None => break,
        }
    }
    fires
}
