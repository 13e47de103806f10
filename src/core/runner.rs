//! The fetch-and-commit sequence
//!
//! One run is a fixed, linear sequence: checkout, identity, sync, runtime
//! check, setup commands, entry point, stage, commit, then the push loop.
//! The first failing step aborts the rest. Every run that gets past the
//! lease leaves a [`RunRecord`] behind, whatever its outcome, and the next
//! run cleans up after a failed one before it starts.

use git2::Repository;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::lock::{LockError, RunLock};
use super::runtime::{verify_runtime, RuntimeError};
use super::state::{RunRecord, RunStatus, RunStore, StateError, StepRecord};
use super::trigger::TriggerEvent;
use super::workflow::{StepConfig, Workflow};
use crate::git::{self, GitError, Identity, SyncOutcome};
use crate::util::{retry_blocking_with_backoff, run_shell, RetryOptions};

/// Errors that end a run
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Checkout failed: {0}")]
    Checkout(GitError),

    #[error("Working tree has uncommitted changes ({}); commit them or pass --allow-dirty", .0.join(", "))]
    DirtyWorktree(Vec<String>),

    #[error("HEAD is detached and the workflow sets no push.branch")]
    DetachedHead,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Failed to configure commit identity: {0}")]
    Identity(GitError),

    #[error("Runtime provisioning failed: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Setup step '{step}' failed{}", exit_suffix(.exit_code))]
    Setup { step: String, exit_code: Option<i32> },

    #[error("Entry point '{step}' failed{}", exit_suffix(.exit_code))]
    Script { step: String, exit_code: Option<i32> },

    #[error("Failed to start step '{step}': {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sync with remote failed: {0}")]
    Sync(GitError),

    #[error("Commit failed: {0}")]
    Commit(GitError),

    #[error("Push failed: {0}")]
    Push(GitError),

    #[error("Failed to save run record: {0}")]
    State(#[from] StateError),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {}", code),
        None => " (terminated by signal)".to_string(),
    }
}

impl RunError {
    /// Failure category stored in the run record
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Checkout(_) | RunError::DirtyWorktree(_) | RunError::DetachedHead => {
                "checkout"
            }
            RunError::Lock(_) => "lock",
            RunError::Identity(_) => "identity",
            RunError::Runtime(_) | RunError::Setup { .. } => "provisioning",
            RunError::Script { .. } | RunError::Spawn { .. } => "script",
            RunError::Sync(_) => "sync",
            RunError::Commit(_) => "commit",
            RunError::Push(_) => "push",
            RunError::State(_) => "state",
        }
    }

    /// Process exit code for this failure.
    ///
    /// A failing child process passes its own exit code through; everything
    /// else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Setup {
                exit_code: Some(code),
                ..
            }
            | RunError::Script {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}

/// Hooks for reporting progress while a run executes
pub trait RunObserver {
    /// A built-in phase (checkout, sync, commit, push) is starting
    fn phase(&mut self, _name: &str) {}
    /// A built-in phase finished with `detail`
    fn phase_done(&mut self, _name: &str, _detail: &str) {}
    /// A shell step is about to run
    fn step_started(&mut self, _step: &StepConfig) {}
    /// A shell step finished
    fn step_finished(&mut self, _record: &StepRecord) {}
}

/// Observer that ignores everything; tracing still records the run
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: RunRecord,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.record.status
    }

    pub fn commit_id(&self) -> Option<&str> {
        self.record.commit_id.as_deref()
    }

    pub fn pushed(&self) -> bool {
        self.record.pushed
    }
}

/// Executes a workflow against one repository
#[derive(Debug, Clone)]
pub struct Runner {
    workflow: Workflow,
    repo_path: PathBuf,
    trigger: TriggerEvent,
    allow_dirty: bool,
}

impl Runner {
    pub fn new<P: Into<PathBuf>>(workflow: Workflow, repo_path: P) -> Self {
        Self {
            workflow,
            repo_path: repo_path.into(),
            trigger: TriggerEvent::Manual,
            allow_dirty: false,
        }
    }

    pub fn trigger(mut self, trigger: TriggerEvent) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn allow_dirty(mut self, allow: bool) -> Self {
        self.allow_dirty = allow;
        self
    }

    pub fn trigger_event(&self) -> &TriggerEvent {
        &self.trigger
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run without progress reporting
    pub fn run(&self) -> Result<RunOutcome, RunError> {
        self.run_with(&mut SilentObserver)
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(skip_all, fields(workflow = %self.workflow.name, trigger = self.trigger.kind()))
    )]
    pub fn run_with(&self, observer: &mut dyn RunObserver) -> Result<RunOutcome, RunError> {
        let repo = git::open_repo(&self.repo_path).map_err(RunError::Checkout)?;
        let store = RunStore::new(git::autorun_dir(&repo));

        if !self.workflow.should_run(&self.trigger) {
            tracing::info!(trigger = %self.trigger, "Trigger does not match workflow, skipping");
            let mut record = RunRecord::start(self.trigger.clone());
            record.finish(RunStatus::Skipped);
            // No lease is taken, so leave last-run.json to whoever holds it
            store.record_history(&record)?;
            return Ok(RunOutcome { record });
        }

        let mut lease = RunLock::acquire(store.dir(), self.workflow.lock.lease_secs)?;

        let previous = match store.last_run() {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable last run record");
                None
            }
        };

        let mut record = RunRecord::start(self.trigger.clone());
        tracing::info!(run_id = %record.run_id, trigger = %self.trigger, "Run started");

        let result = self.execute(&repo, previous.as_ref(), &mut lease, &mut record, observer);
        match result {
            Ok(()) => {
                record.finish(RunStatus::Succeeded);
                store.record(&record)?;
                tracing::info!(
                    run_id = %record.run_id,
                    commit = record.commit_id.as_deref().unwrap_or("none"),
                    pushed = record.pushed,
                    "Run succeeded"
                );
                Ok(RunOutcome { record })
            }
            Err(e @ RunError::Lock(_)) => {
                // The lease went to another run, which now owns the record
                tracing::error!(run_id = %record.run_id, error = %e, "Run lost its lease");
                Err(e)
            }
            Err(e) => {
                record.fail(e.kind(), e.to_string());
                if let Err(save_err) = store.record(&record) {
                    tracing::warn!(error = %save_err, "Failed to save run record");
                }
                tracing::error!(run_id = %record.run_id, kind = e.kind(), error = %e, "Run failed");
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        repo: &Repository,
        previous: Option<&RunRecord>,
        lease: &mut RunLock,
        record: &mut RunRecord,
        observer: &mut dyn RunObserver,
    ) -> Result<(), RunError> {
        let remote = self.workflow.push.remote.as_str();

        // 1. checkout
        observer.phase("checkout");
        git::wait_for_git_lock(repo).map_err(RunError::Checkout)?;
        let branch = self.push_branch(repo)?;
        if let Some(previous) = previous.filter(|p| p.left_residue()) {
            if self.allow_dirty {
                tracing::warn!(run_id = %previous.run_id, "Previous run failed; keeping its leftovers");
            } else {
                self.restore_checkout(repo, previous, remote, &branch)?;
            }
        }
        let status = git::get_status_info(repo).map_err(RunError::Checkout)?;
        if !status.is_clean {
            if !self.allow_dirty {
                return Err(RunError::DirtyWorktree(status.changed_files()));
            }
            tracing::warn!(files = status.changed_files().len(), "Running on a dirty working tree");
        }
        observer.phase_done("checkout", &branch);

        // 2. identity
        let identity = Identity::from(&self.workflow.identity);
        git::configure_identity(repo, &identity).map_err(RunError::Identity)?;

        // 3. sync
        observer.phase("sync");
        let synced = git::sync_fast_forward(repo, remote, &branch).map_err(RunError::Sync)?;
        observer.phase_done("sync", sync_detail(synced));

        // 4. runtime + setup
        if let Some(ref runtime) = self.workflow.runtime {
            observer.phase("runtime");
            let verified = verify_runtime(runtime)?;
            observer.phase_done("runtime", &verified.version);
        }
        let env = self.step_env(record);
        for step in &self.workflow.setup {
            lease.renew()?;
            let step_record = self.run_step(step, &env, record, observer)?;
            if !step_record.success {
                return Err(RunError::Setup {
                    step: step.name.clone(),
                    exit_code: step_record.exit_code,
                });
            }
        }

        // 5. entry point
        lease.renew()?;
        let step_record = self.run_step(&self.workflow.run, &env, record, observer)?;
        if !step_record.success {
            return Err(RunError::Script {
                step: self.workflow.run.name.clone(),
                exit_code: step_record.exit_code,
            });
        }

        // 6-7. stage + commit
        lease.renew()?;
        observer.phase("commit");
        let staged = git::stage_all(repo).map_err(RunError::Commit)?;
        record.commit_id =
            git::safe_commit(repo, &self.workflow.commit.label).map_err(RunError::Commit)?;
        let commit_detail = match record.commit_id {
            Some(ref id) => format!("{} ({} files)", short_id(id), staged),
            None => "nothing to commit".to_string(),
        };
        observer.phase_done("commit", &commit_detail);

        // 8-9. resync + push
        lease.renew()?;
        observer.phase("push");
        let ahead = git::commits_ahead_of_remote(repo, remote, &branch).map_err(RunError::Push)?;
        if record.commit_id.is_none() && ahead == Some(0) {
            tracing::info!("No new commits, skipping push");
            observer.phase_done("push", "up to date");
            return Ok(());
        }

        let attempts = self.push_with_retry(repo, remote, &branch)?;
        record.push_attempts = attempts;
        record.pushed = true;
        observer.phase_done("push", &format!("{}/{}", remote, branch));

        Ok(())
    }

    /// Undo what a failed run left behind: its partial output and, after a
    /// failed sync or push, its unpushed commits.
    ///
    /// Local commits are only dropped when every one of them carries the
    /// commit label; anything else is someone's work and is left for the
    /// sync step to report.
    fn restore_checkout(
        &self,
        repo: &Repository,
        previous: &RunRecord,
        remote: &str,
        branch: &str,
    ) -> Result<(), RunError> {
        tracing::warn!(
            run_id = %previous.run_id,
            kind = previous.failure_kind.as_deref().unwrap_or("unknown"),
            "Previous run failed, restoring a clean checkout"
        );
        git::discard_changes(repo).map_err(RunError::Checkout)?;

        if !previous.left_unpushed_commits() {
            return Ok(());
        }
        git::fetch_remote(repo, remote).map_err(RunError::Sync)?;
        if !git::remote_branch_exists(repo, remote, branch) {
            return Ok(());
        }

        let tracking = format!("{}/{}", remote, branch);
        let unpushed =
            git::commit_subjects_between(repo, &tracking, "HEAD").map_err(RunError::Checkout)?;
        let label = self.workflow.commit.label.trim();
        if !unpushed.is_empty() && unpushed.iter().all(|subject| subject.trim() == label) {
            tracing::warn!(
                commits = unpushed.len(),
                target = %tracking,
                "Dropping unpushed commits from the failed run"
            );
            git::reset_hard(repo, &tracking).map_err(RunError::Checkout)?;
        }
        Ok(())
    }

    /// Branch to sync with and push to
    fn push_branch(&self, repo: &Repository) -> Result<String, RunError> {
        if let Some(ref branch) = self.workflow.push.branch {
            return Ok(branch.clone());
        }
        git::current_branch(repo)
            .map_err(RunError::Checkout)?
            .ok_or(RunError::DetachedHead)
    }

    /// Absorb remote changes, then push; a non-fast-forward rejection
    /// triggers fetch + rebase and another attempt.
    ///
    /// Returns the number of push attempts made.
    fn push_with_retry(
        &self,
        repo: &Repository,
        remote: &str,
        branch: &str,
    ) -> Result<u32, RunError> {
        rebase_if_behind(repo, remote, branch).map_err(RunError::Sync)?;

        let options = RetryOptions {
            max_retries: self.workflow.push.max_retries,
            initial_delay_ms: self.workflow.push.retry_delay_ms,
            max_delay_ms: self.workflow.push.retry_delay_ms.saturating_mul(30),
            jitter: 0.1,
        };

        let mut attempts = 0;
        retry_blocking_with_backoff(
            &options,
            |attempt| {
                attempts = attempt + 1;
                git::push_head(repo, remote, branch)
            },
            |e| matches!(e, GitError::PushRejected(_)),
            |attempt, _| {
                tracing::info!(attempt, "Push rejected, rebasing onto remote");
                rebase_if_behind(repo, remote, branch)
            },
        )
        .map_err(RunError::Push)?;

        Ok(attempts)
    }

    fn step_env(&self, record: &RunRecord) -> BTreeMap<String, String> {
        let mut env = self.workflow.env.clone();
        env.insert("AUTORUN_TRIGGER".to_string(), self.trigger.kind().to_string());
        env.insert("AUTORUN_RUN_ID".to_string(), record.run_id.clone());
        env.insert("AUTORUN_WORKFLOW".to_string(), self.workflow.name.clone());
        env
    }

    fn run_step(
        &self,
        step: &StepConfig,
        base_env: &BTreeMap<String, String>,
        record: &mut RunRecord,
        observer: &mut dyn RunObserver,
    ) -> Result<StepRecord, RunError> {
        observer.step_started(step);

        let cwd = match step.cwd {
            Some(ref dir) => self.repo_path.join(dir),
            None => self.repo_path.clone(),
        };
        let mut env = base_env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let output = run_shell(&step.command, &cwd, &env).map_err(|source| RunError::Spawn {
            step: step.name.clone(),
            source,
        })?;

        let step_record = StepRecord::from_output(&step.name, &step.command, &output);
        tracing::debug!(
            step = %step.name,
            success = step_record.success,
            exit_code = ?step_record.exit_code,
            duration_ms = step_record.duration_ms,
            "Step finished"
        );
        observer.step_finished(&step_record);
        record.steps.push(step_record.clone());

        Ok(step_record)
    }
}

/// Fetch and replay local commits onto the remote branch if it moved.
fn rebase_if_behind(repo: &Repository, remote: &str, branch: &str) -> Result<(), GitError> {
    git::fetch_remote(repo, remote)?;
    if !git::remote_branch_exists(repo, remote, branch) {
        return Ok(());
    }
    let tracking = format!("{}/{}", remote, branch);
    if git::commits_between(repo, "HEAD", &tracking)? > 0 {
        git::rebase_onto_remote(repo, remote, branch)?;
    }
    Ok(())
}

fn sync_detail(outcome: SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::UpToDate => "up to date",
        SyncOutcome::FastForwarded => "fast-forwarded",
        SyncOutcome::NoRemoteBranch => "no remote branch yet",
    }
}

fn short_id(id: &str) -> &str {
    id.get(..7).unwrap_or(id)
}
