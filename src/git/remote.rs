//! Git remote operations

use git2::Repository;
use std::process::{Command, Output};

use super::GitError;
use crate::util::log_cmd;

#[cfg(feature = "telemetry")]
use std::time::Instant;
#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

/// Outcome of a fast-forward synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local branch already contained the remote tip
    UpToDate,
    /// Local branch was fast-forwarded to the remote tip
    FastForwarded,
    /// The remote has no such branch yet (first push will create it)
    NoRemoteBranch,
}

fn run_git(repo: &Repository, args: &[&str]) -> Result<Output, GitError> {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(super::get_workdir(repo));
    log_cmd(&cmd);
    cmd.output()
        .map_err(|e| GitError::OperationFailed(e.to_string()))
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Get the URL of a remote
pub fn get_remote_url(repo: &Repository, remote: &str) -> Result<Option<String>, GitError> {
    let output = run_git(repo, &["remote", "get-url", remote])?;

    if output.status.success() {
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(url))
    } else {
        Ok(None)
    }
}

/// Fetch from remote
#[cfg_attr(feature = "telemetry", instrument(skip(repo)))]
pub fn fetch_remote(repo: &Repository, remote: &str) -> Result<(), GitError> {
    #[cfg(feature = "telemetry")]
    let start = Instant::now();

    let output = run_git(repo, &["fetch", remote])?;
    let success = output.status.success();

    #[cfg(feature = "telemetry")]
    debug!(
        remote,
        success,
        duration_ms = start.elapsed().as_millis() as u64,
        "Git fetch complete"
    );

    if !success {
        return Err(GitError::OperationFailed(interpret_push_error(&stderr_of(
            &output,
        ))));
    }

    Ok(())
}

/// Check whether `<remote>/<branch>` is known locally (after a fetch).
pub fn remote_branch_exists(repo: &Repository, remote: &str, branch: &str) -> bool {
    repo.find_reference(&format!("refs/remotes/{}/{}", remote, branch))
        .is_ok()
}

/// Fetch and fast-forward the current branch to `<remote>/<branch>`.
///
/// Equivalent to `git pull --ff-only`; a diverged history is reported as
/// [`GitError::NotFastForward`] and leaves the working tree untouched.
#[cfg_attr(feature = "telemetry", instrument(skip(repo)))]
pub fn sync_fast_forward(
    repo: &Repository,
    remote: &str,
    branch: &str,
) -> Result<SyncOutcome, GitError> {
    fetch_remote(repo, remote)?;

    if !remote_branch_exists(repo, remote, branch) {
        return Ok(SyncOutcome::NoRemoteBranch);
    }

    let tracking = format!("{}/{}", remote, branch);
    if commits_between(repo, "HEAD", &tracking)? == 0 {
        return Ok(SyncOutcome::UpToDate);
    }

    let output = run_git(repo, &["merge", "--ff-only", &tracking])?;
    if !output.status.success() {
        let stderr = stderr_of(&output);
        let lower = stderr.to_lowercase();
        if lower.contains("not possible to fast-forward") || lower.contains("diverg") {
            return Err(GitError::NotFastForward(format!(
                "local branch and {} have diverged",
                tracking
            )));
        }
        return Err(GitError::OperationFailed(stderr));
    }

    Ok(SyncOutcome::FastForwarded)
}

/// Count commits reachable from `to` but not from `from` (`from..to`).
pub fn commits_between(repo: &Repository, from: &str, to: &str) -> Result<usize, GitError> {
    let output = run_git(repo, &["rev-list", "--count", &format!("{}..{}", from, to)])?;
    if !output.status.success() {
        return Err(GitError::Reference(stderr_of(&output)));
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|e| GitError::Reference(format!("unexpected rev-list output: {}", e)))
}

/// Subject lines of the commits in `from..to`, newest first.
pub fn commit_subjects_between(
    repo: &Repository,
    from: &str,
    to: &str,
) -> Result<Vec<String>, GitError> {
    let output = run_git(
        repo,
        &["log", "--format=%s", &format!("{}..{}", from, to)],
    )?;
    if !output.status.success() {
        return Err(GitError::Reference(stderr_of(&output)));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}

/// Number of local commits not yet on `<remote>/<branch>`.
///
/// Returns `None` when the remote branch does not exist yet.
pub fn commits_ahead_of_remote(
    repo: &Repository,
    remote: &str,
    branch: &str,
) -> Result<Option<usize>, GitError> {
    if !remote_branch_exists(repo, remote, branch) {
        return Ok(None);
    }
    commits_between(repo, &format!("{}/{}", remote, branch), "HEAD").map(Some)
}

/// Push HEAD to `<remote>/<branch>`.
///
/// A non-fast-forward rejection is reported as [`GitError::PushRejected`]
/// so callers can re-synchronize and try again; anything else (auth,
/// unreachable remote) is an [`GitError::OperationFailed`].
#[cfg_attr(feature = "telemetry", instrument(skip(repo)))]
pub fn push_head(repo: &Repository, remote: &str, branch: &str) -> Result<(), GitError> {
    #[cfg(feature = "telemetry")]
    let start = Instant::now();

    let refspec = format!("HEAD:refs/heads/{}", branch);
    let output = run_git(repo, &["push", remote, &refspec])?;
    let success = output.status.success();

    #[cfg(feature = "telemetry")]
    debug!(
        remote,
        branch,
        success,
        duration_ms = start.elapsed().as_millis() as u64,
        "Git push complete"
    );

    if !success {
        let stderr = stderr_of(&output);
        if is_rejection(&stderr) {
            return Err(GitError::PushRejected(stderr));
        }
        return Err(GitError::OperationFailed(interpret_push_error(&stderr)));
    }

    Ok(())
}

/// Replay local commits on top of `<remote>/<branch>`.
///
/// A conflicting rebase is aborted, leaving the branch as it was, and
/// reported as [`GitError::RebaseConflict`].
#[cfg_attr(feature = "telemetry", instrument(skip(repo)))]
pub fn rebase_onto_remote(repo: &Repository, remote: &str, branch: &str) -> Result<(), GitError> {
    let tracking = format!("{}/{}", remote, branch);
    let output = run_git(repo, &["rebase", &tracking])?;

    if !output.status.success() {
        let stderr = stderr_of(&output);
        let abort = run_git(repo, &["rebase", "--abort"])?;
        if !abort.status.success() {
            tracing::warn!(stderr = %stderr_of(&abort), "git rebase --abort failed");
        }
        return Err(GitError::RebaseConflict(format!(
            "could not replay local commits onto {}: {}",
            tracking, stderr
        )));
    }

    Ok(())
}

fn is_rejection(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("[rejected]")
        || lower.contains("non-fast-forward")
        || lower.contains("fetch first")
        || (lower.contains("[remote rejected]") && lower.contains("cannot lock ref"))
}

/// Interpret common git push/fetch errors into user-friendly messages
fn interpret_push_error(stderr: &str) -> String {
    let lower = stderr.to_lowercase();
    if lower.contains("could not read from remote")
        || lower.contains("repository not found")
        || lower.contains("does not appear to be a git repository")
    {
        return format!(
            "Cannot reach remote. Check the network connection and remote URL.\n\
             (Original: {})",
            stderr.trim()
        );
    }
    if lower.contains("permission denied") || lower.contains("authentication failed") {
        return format!(
            "Authentication failed. Check the credentials available to this runner.\n\
             (Original: {})",
            stderr.trim()
        );
    }
    stderr.to_string()
}
