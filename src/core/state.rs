//! Run record persistence
//!
//! Every run leaves a JSON record under `.git/autorun/`: `last-run.json`
//! for the most recent one and `runs/<run-id>.json` for history. Living
//! inside the git directory keeps the records out of the stage-all step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::trigger::TriggerEvent;
use crate::util::ShellOutput;

pub const LAST_RUN_FILE: &str = "last-run.json";
pub const RUNS_DIR: &str = "runs";

/// Number of run records kept in `runs/`
pub const HISTORY_LIMIT: usize = 50;

/// Captured output beyond this many bytes is truncated in the record
const OUTPUT_LIMIT: usize = 16 * 1024;

/// Errors that can occur when loading or saving run records
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read run record: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse run record JSON: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Result of one shell step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl StepRecord {
    pub fn from_output(name: &str, command: &str, output: &ShellOutput) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            success: output.success,
            exit_code: output.exit_code,
            duration_ms: output.duration.as_millis() as u64,
            output: truncate_output(&output.combined()),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Everything one run did
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub trigger: TriggerEvent,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(default)]
    pub pushed: bool,
    #[serde(default)]
    pub push_attempts: u32,
    /// Short failure category (`script`, `push`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn start(trigger: TriggerEvent) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: new_run_id(started_at),
            trigger,
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            steps: Vec::new(),
            commit_id: None,
            pushed: false,
            push_attempts: 0,
            failure_kind: None,
            error: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, kind: &str, message: String) {
        self.failure_kind = Some(kind.to_string());
        self.error = Some(message);
        self.finish(RunStatus::Failed);
    }

    /// Whether this run failed after it started changing the working tree
    /// or the branch, so the next run has to restore a clean checkout.
    pub fn left_residue(&self) -> bool {
        self.status == RunStatus::Failed
            && matches!(
                self.failure_kind.as_deref(),
                Some("identity" | "provisioning" | "script" | "commit" | "sync" | "push")
            )
    }

    /// Whether this run may have left unpushed commits on the branch.
    pub fn left_unpushed_commits(&self) -> bool {
        self.status == RunStatus::Failed
            && matches!(self.failure_kind.as_deref(), Some("sync" | "push"))
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Load a record from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a record from a JSON string
    pub fn parse(json: &str) -> Result<Self, StateError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save the record to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Run records stored in one state directory
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.dir.join(LAST_RUN_FILE)
    }

    /// Save as the latest run and add it to history.
    ///
    /// Only the lease holder may call this.
    pub fn record(&self, record: &RunRecord) -> Result<(), StateError> {
        record.save(self.last_run_path())?;
        self.record_history(record)
    }

    /// Add to history only, leaving `last-run.json` to the lease holder.
    pub fn record_history(&self, record: &RunRecord) -> Result<(), StateError> {
        record.save(self.dir.join(RUNS_DIR).join(format!("{}.json", record.run_id)))?;
        self.prune(HISTORY_LIMIT)
    }

    pub fn last_run(&self) -> Result<Option<RunRecord>, StateError> {
        let path = self.last_run_path();
        if !path.exists() {
            return Ok(None);
        }
        RunRecord::load(path).map(Some)
    }

    /// Most recent runs first, at most `limit`
    pub fn history(&self, limit: usize) -> Result<Vec<RunRecord>, StateError> {
        let mut records = Vec::new();
        for path in self.history_files()?.into_iter().rev().take(limit) {
            match RunRecord::load(&path) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable run record"),
            }
        }
        Ok(records)
    }

    /// History file paths, oldest first. Run ids sort chronologically.
    fn history_files(&self) -> Result<Vec<PathBuf>, StateError> {
        let runs_dir = self.dir.join(RUNS_DIR);
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&runs_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn prune(&self, keep: usize) -> Result<(), StateError> {
        let files = self.history_files()?;
        if files.len() <= keep {
            return Ok(());
        }
        for path in &files[..files.len() - keep] {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn new_run_id(started_at: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        started_at.format("%Y%m%dT%H%M%S%.3fZ"),
        std::process::id()
    )
}

fn truncate_output(output: &str) -> String {
    if output.len() <= OUTPUT_LIMIT {
        return output.to_string();
    }
    let mut start = output.len() - OUTPUT_LIMIT;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("[... truncated]\n{}", &output[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record_with_id(id: &str) -> RunRecord {
        let mut record = RunRecord::start(TriggerEvent::Manual);
        record.run_id = id.to_string();
        record.finish(RunStatus::Succeeded);
        record
    }

    #[test]
    fn test_no_last_run() {
        let temp = TempDir::new().unwrap();
        let store = RunStore::new(temp.path());
        assert!(store.last_run().unwrap().is_none());
        assert!(store.history(10).unwrap().is_empty());
    }

    #[test]
    fn test_record_and_reload() {
        let temp = TempDir::new().unwrap();
        let store = RunStore::new(temp.path().join("autorun"));

        let mut record = RunRecord::start(TriggerEvent::Schedule);
        record.commit_id = Some("abc123".to_string());
        record.pushed = true;
        record.finish(RunStatus::Succeeded);
        store.record(&record).unwrap();

        let loaded = store.last_run().unwrap().unwrap();
        assert_eq!(loaded.run_id, record.run_id);
        assert_eq!(loaded.trigger, TriggerEvent::Schedule);
        assert_eq!(loaded.status, RunStatus::Succeeded);
        assert_eq!(loaded.commit_id.as_deref(), Some("abc123"));
        assert!(loaded.pushed);
        assert!(loaded.duration().is_some());
    }

    #[test]
    fn test_failure_fields() {
        let mut record = RunRecord::start(TriggerEvent::Manual);
        record.fail("script", "entry point exited with 2".to_string());

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("\"failureKind\":\"script\""));
        assert!(json.contains("\"trigger\":{\"event\":\"manual\"}"));
    }

    #[test]
    fn test_history_newest_first_and_pruned() {
        let temp = TempDir::new().unwrap();
        let store = RunStore::new(temp.path());

        for i in 0..(HISTORY_LIMIT + 5) {
            store.record(&record_with_id(&format!("run-{:04}", i))).unwrap();
        }

        let history = store.history(usize::MAX).unwrap();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].run_id, format!("run-{:04}", HISTORY_LIMIT + 4));
        assert_eq!(history.last().unwrap().run_id, "run-0005");
    }

    #[test]
    fn test_history_only_leaves_last_run_alone() {
        let temp = TempDir::new().unwrap();
        let store = RunStore::new(temp.path());
        store.record(&record_with_id("20240319T030000.000Z-1")).unwrap();

        let mut skipped = RunRecord::start(TriggerEvent::Manual);
        skipped.run_id = "20240319T050000.000Z-2".to_string();
        skipped.finish(RunStatus::Skipped);
        store.record_history(&skipped).unwrap();

        let last = store.last_run().unwrap().unwrap();
        assert_eq!(last.run_id, "20240319T030000.000Z-1");
        assert_eq!(store.history(10).unwrap()[0].status, RunStatus::Skipped);
    }

    #[test]
    fn test_residue_depends_on_failure_kind() {
        let mut record = RunRecord::start(TriggerEvent::Schedule);
        record.fail("script", "exit 3".to_string());
        assert!(record.left_residue());
        assert!(!record.left_unpushed_commits());

        record.fail("push", "rejected".to_string());
        assert!(record.left_residue());
        assert!(record.left_unpushed_commits());

        // A refused dirty tree belongs to the user, not to a run
        record.fail("checkout", "dirty".to_string());
        assert!(!record.left_residue());

        assert!(!record_with_id("20240319T030000.000Z-1").left_residue());
    }

    #[test]
    fn test_truncate_output_keeps_tail() {
        let long = format!("{}END", "x".repeat(OUTPUT_LIMIT));
        let truncated = truncate_output(&long);
        assert!(truncated.starts_with("[... truncated]"));
        assert!(truncated.ends_with("END"));
        assert_eq!(truncate_output("short"), "short");
    }
}
