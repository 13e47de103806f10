//! Trigger events and matching against a workflow's `on:` block

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::workflow::Workflow;

/// What caused a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TriggerEvent {
    /// A push to `branch`
    Push { branch: String },
    /// A cron schedule fired
    Schedule,
    /// Someone ran `autorun run` by hand
    Manual,
}

impl TriggerEvent {
    /// Short name exported to steps as `AUTORUN_TRIGGER`
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::Schedule => "schedule",
            TriggerEvent::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Push { branch } => write!(f, "push ({})", branch),
            other => f.write_str(other.kind()),
        }
    }
}

/// Event kind as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Push,
    Schedule,
    Manual,
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "push" => Ok(EventKind::Push),
            "schedule" => Ok(EventKind::Schedule),
            "manual" | "workflow_dispatch" => Ok(EventKind::Manual),
            _ => Err(format!(
                "unknown event '{}' (expected push, schedule or manual)",
                s
            )),
        }
    }
}

impl Workflow {
    /// Whether `event` should start a run of this workflow
    pub fn should_run(&self, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Push { branch } => match self.triggers.push {
                Some(ref push) => {
                    push.branches.is_empty()
                        || push.branches.iter().any(|p| branch_matches(branch, p))
                }
                None => false,
            },
            TriggerEvent::Schedule => !self.triggers.schedule.is_empty(),
            TriggerEvent::Manual => self.triggers.manual,
        }
    }
}

/// Match a branch name against a pattern.
///
/// `*` matches within one path segment, `**` matches across segments.
pub fn branch_matches(branch: &str, pattern: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if !pattern.contains('*') {
        return branch == pattern;
    }

    let mut expr = String::from("^");
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("**") {
            expr.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            expr.push_str("[^/]*");
            rest = tail;
        } else {
            let end = rest.find('*').unwrap_or(rest.len());
            expr.push_str(&regex::escape(&rest[..end]));
            rest = &rest[end..];
        }
    }
    expr.push('$');

    Regex::new(&expr)
        .map(|re| re.is_match(branch))
        .unwrap_or(false)
}
