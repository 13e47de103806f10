//! Workflow parsing and validation
//!
//! The workflow file (`autorun.yaml`) describes when the runner fires, how
//! the runtime is provisioned, which command produces data, and how the
//! result is committed and pushed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use super::schedule::{CronSchedule, ScheduleError};
use crate::git::Identity;

/// Errors that can occur when loading or validating a workflow
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Failed to read workflow file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse workflow YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Path escapes repository boundary: {0}")]
    PathTraversal(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Commit label used when the workflow does not name one
pub const DEFAULT_COMMIT_LABEL: &str = "autorun-getdata";

/// Push trigger: fire when these branches receive a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushTrigger {
    /// Branch patterns (`main`, `release/*`); empty means every branch
    #[serde(default)]
    pub branches: Vec<String>,
}

/// One cron entry of a schedule trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleEntry {
    pub cron: String,
}

/// The `on:` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<PushTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule: Vec<ScheduleEntry>,
    /// Allow `autorun run` without a matching event
    #[serde(default = "default_true")]
    pub manual: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            push: Some(PushTrigger {
                branches: vec!["main".to_string()],
            }),
            schedule: vec![ScheduleEntry {
                cron: "0 3,5,9 * * *".to_string(),
            }],
            manual: true,
        }
    }
}

/// Interpreter version pin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Program looked up on PATH (e.g. `python`)
    pub interpreter: String,
    /// Required version, exact or a component prefix (`3.10` accepts `3.10.14`)
    pub version: String,
}

/// Commit author/committer identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    pub name: String,
    pub email: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "autorun-bot".to_string(),
            email: "autorun-bot@users.noreply.github.com".to_string(),
        }
    }
}

impl From<&IdentityConfig> for Identity {
    fn from(config: &IdentityConfig) -> Self {
        Identity {
            name: config.name.clone(),
            email: config.email.clone(),
        }
    }
}

/// A named shell command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    /// Step name for display
    pub name: String,
    /// Command to execute (via `sh -c`)
    pub command: String,
    /// Optional working directory, relative to the repository root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Step-specific environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl StepConfig {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }
}

/// Commit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitConfig {
    /// Commit message used for every data commit
    #[serde(default = "default_label")]
    pub label: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
        }
    }
}

fn default_label() -> String {
    DEFAULT_COMMIT_LABEL.to_string()
}

/// Push settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushConfig {
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Remote branch; defaults to the checked-out branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Extra attempts after a non-fast-forward rejection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            branch: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

/// Run lease settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// A lease older than this is considered abandoned and may be taken over
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_lease_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_name() -> String {
    "autorun".to_string()
}

/// The workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default, rename = "on")]
    pub triggers: TriggerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Environment variables for every step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Provisioning commands, run in order before the entry point
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<StepConfig>,
    /// The data-producing entry point
    pub run: StepConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

/// Commented template written by `autorun init`.
pub const WORKFLOW_TEMPLATE: &str = r#"# autorun workflow
name: autorun-getdata

on:
  push:
    branches: [main]
  schedule:
    # 03:00, 05:00 and 09:00 UTC every day
    - cron: "0 3,5,9 * * *"
  manual: true

runtime:
  interpreter: python
  version: "3.10.14"

identity:
  name: autorun-bot
  email: autorun-bot@users.noreply.github.com

setup:
  - name: upgrade installer
    command: python -m pip install --upgrade pip
  - name: install dependencies
    command: pip install -r requirements.txt

run:
  name: fetch data
  command: python main.py

commit:
  label: autorun-getdata

push:
  remote: origin
  max_retries: 3
  retry_delay_ms: 1000

lock:
  lease_secs: 3600
"#;

impl Workflow {
    /// Load a workflow from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a workflow from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, WorkflowError> {
        let workflow: Workflow = serde_yaml::from_str(yaml)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// The workflow `autorun init` writes: python runtime pin, pip setup,
    /// `python main.py`, three daily runs.
    pub fn template() -> Result<Self, WorkflowError> {
        Self::parse(WORKFLOW_TEMPLATE)
    }

    /// Parsed cron schedules of the `on.schedule` trigger
    pub fn schedules(&self) -> Result<Vec<CronSchedule>, WorkflowError> {
        self.triggers
            .schedule
            .iter()
            .map(|entry| CronSchedule::parse(&entry.cron).map_err(WorkflowError::from))
            .collect()
    }

    /// Setup steps followed by the entry point, in execution order
    pub fn steps(&self) -> impl Iterator<Item = &StepConfig> {
        self.setup.iter().chain(std::iter::once(&self.run))
    }

    /// Validate the workflow
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "Workflow name must not be empty".to_string(),
            ));
        }

        for step in self.steps() {
            self.validate_step(step)?;
        }

        let label = &self.commit.label;
        if label.trim().is_empty() || label.contains('\n') {
            return Err(WorkflowError::ValidationError(
                "Commit label must be a single non-empty line".to_string(),
            ));
        }

        if self.identity.name.trim().is_empty() || self.identity.email.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "Identity needs both a name and an email".to_string(),
            ));
        }

        if let Some(ref runtime) = self.runtime {
            if runtime.interpreter.trim().is_empty() || runtime.version.trim().is_empty() {
                return Err(WorkflowError::ValidationError(
                    "Runtime needs both an interpreter and a version".to_string(),
                ));
            }
        }

        if self.push.remote.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "Push remote must not be empty".to_string(),
            ));
        }
        if let Some(ref branch) = self.push.branch {
            if branch.is_empty() || branch.contains(char::is_whitespace) {
                return Err(WorkflowError::ValidationError(format!(
                    "Invalid push branch '{}'",
                    branch
                )));
            }
        }

        if self.lock.lease_secs == 0 {
            return Err(WorkflowError::ValidationError(
                "lock.lease_secs must be greater than zero".to_string(),
            ));
        }

        self.schedules()?;

        Ok(())
    }

    fn validate_step(&self, step: &StepConfig) -> Result<(), WorkflowError> {
        if step.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "Step with command '{}' must have a name",
                step.command
            )));
        }

        if step.command.trim().is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "Step '{}' must have a command",
                step.name
            )));
        }

        if let Some(ref cwd) = step.cwd {
            if path_escapes_boundary(cwd) {
                return Err(WorkflowError::PathTraversal(format!(
                    "Step '{}' cwd escapes repository boundary: {}",
                    step.name, cwd
                )));
            }
        }

        Ok(())
    }
}

/// Check if a path would escape the repository root
fn path_escapes_boundary(path: &str) -> bool {
    let normalized = path.replace('\\', "/");

    normalized.starts_with("..")
        || normalized.starts_with('/')
        || normalized.contains("/../")
        || normalized.ends_with("/..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
run:
  name: fetch
  command: ./fetch.sh
"#;
        let workflow = Workflow::parse(yaml).unwrap();
        assert_eq!(workflow.name, "autorun");
        assert_eq!(workflow.commit.label, DEFAULT_COMMIT_LABEL);
        assert_eq!(workflow.push.remote, "origin");
        assert_eq!(workflow.push.branch, None);
        assert_eq!(workflow.push.max_retries, 3);
        assert!(workflow.setup.is_empty());
        assert!(workflow.runtime.is_none());
        // Absent `on:` block keeps the push-to-main + thrice-daily triggers
        assert_eq!(workflow.triggers, TriggerConfig::default());
    }

    #[test]
    fn test_template_matches_original_workflow() {
        let workflow = Workflow::template().unwrap();
        assert_eq!(workflow.name, "autorun-getdata");
        assert_eq!(workflow.triggers, TriggerConfig::default());
        assert_eq!(
            workflow.runtime,
            Some(RuntimeConfig {
                interpreter: "python".to_string(),
                version: "3.10.14".to_string(),
            })
        );

        let commands: Vec<&str> = workflow.steps().map(|s| s.command.as_str()).collect();
        assert_eq!(
            commands,
            vec![
                "python -m pip install --upgrade pip",
                "pip install -r requirements.txt",
                "python main.py",
            ]
        );
        assert_eq!(workflow.commit.label, "autorun-getdata");
        assert_eq!(workflow.schedules().unwrap()[0].as_str(), "0 3,5,9 * * *");
    }

    #[test]
    fn test_explicit_on_block_is_taken_literally() {
        let yaml = r#"
on:
  schedule:
    - cron: "*/30 * * * *"
run:
  name: fetch
  command: ./fetch.sh
"#;
        let workflow = Workflow::parse(yaml).unwrap();
        assert!(workflow.triggers.push.is_none());
        assert!(workflow.triggers.manual);
        assert_eq!(workflow.triggers.schedule.len(), 1);
    }

    #[test]
    fn test_omitted_setup_runs_only_the_entry_point() {
        let yaml = r#"
runtime:
  interpreter: python
  version: "3.10"
run:
  name: fetch
  command: python main.py
"#;
        let workflow = Workflow::parse(yaml).unwrap();
        let steps: Vec<&str> = workflow.steps().map(|s| s.name.as_str()).collect();
        assert_eq!(steps, vec!["fetch"]);
    }

    #[test]
    fn test_missing_run_fails() {
        let result = Workflow::parse("name: nothing\n");
        assert!(matches!(result, Err(WorkflowError::ParseError(_))));
    }

    #[test]
    fn test_unknown_field_fails() {
        let yaml = r#"
run:
  name: fetch
  command: ./fetch.sh
pusj:
  remote: origin
"#;
        assert!(matches!(
            Workflow::parse(yaml),
            Err(WorkflowError::ParseError(_))
        ));
    }

    #[test]
    fn test_empty_command_fails() {
        let yaml = r#"
run:
  name: fetch
  command: "   "
"#;
        assert!(matches!(
            Workflow::parse(yaml),
            Err(WorkflowError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_cron_fails() {
        let yaml = r#"
on:
  schedule:
    - cron: "0 25 * * *"
run:
  name: fetch
  command: ./fetch.sh
"#;
        assert!(matches!(
            Workflow::parse(yaml),
            Err(WorkflowError::Schedule(_))
        ));
    }

    #[test]
    fn test_multiline_label_fails() {
        let yaml = r#"
run:
  name: fetch
  command: ./fetch.sh
commit:
  label: "first\nsecond"
"#;
        assert!(matches!(
            Workflow::parse(yaml),
            Err(WorkflowError::ValidationError(_))
        ));
    }

    #[test]
    fn test_step_cwd_traversal_fails() {
        let yaml = r#"
setup:
  - name: escape
    command: ls
    cwd: ../outside
run:
  name: fetch
  command: ./fetch.sh
"#;
        assert!(matches!(
            Workflow::parse(yaml),
            Err(WorkflowError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_zero_lease_fails() {
        let yaml = r#"
run:
  name: fetch
  command: ./fetch.sh
lock:
  lease_secs: 0
"#;
        assert!(matches!(
            Workflow::parse(yaml),
            Err(WorkflowError::ValidationError(_))
        ));
    }

    #[test]
    fn test_path_escapes_boundary() {
        assert!(path_escapes_boundary("../x"));
        assert!(path_escapes_boundary("/etc"));
        assert!(path_escapes_boundary("a/../../b"));
        assert!(path_escapes_boundary("a\\..\\..\\b"));
        assert!(path_escapes_boundary("a/.."));
        assert!(!path_escapes_boundary("scripts"));
        assert!(!path_escapes_boundary("data/2024"));
    }
}
