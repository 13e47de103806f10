//! Git operations wrapper
//!
//! Local repository work (open, config, index, commits) goes through git2
//! (libgit2 bindings). Anything that talks to a remote or rewrites history
//! (fetch, pull, push, rebase) shells out to the `git` CLI so credentials
//! helpers and hooks behave exactly as they do for a human.

pub mod commit;
pub mod remote;
pub mod status;

pub use commit::*;
pub use remote::*;
pub use status::*;

use crate::util::log_cmd;
use git2::Repository;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Directory inside `.git` where autorun keeps its lease and run records.
pub const AUTORUN_DIR: &str = "autorun";

/// Errors that can occur during git operations
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Not a git repository: {0}")]
    NotARepo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Reference error: {0}")]
    Reference(String),

    #[error("Repository locked: {0}")]
    RepositoryLocked(String),

    #[error("Pull is not a fast-forward: {0}")]
    NotFastForward(String),

    #[error("Push rejected by remote: {0}")]
    PushRejected(String),

    #[error("Rebase conflict: {0}")]
    RebaseConflict(String),
}

/// Open a git repository at the given path
pub fn open_repo<P: AsRef<Path>>(path: P) -> Result<Repository, GitError> {
    Repository::open(path.as_ref())
        .map_err(|e| GitError::NotARepo(format!("{}: {}", path.as_ref().display(), e)))
}

/// Working directory of the repository containing `path` (searching upwards).
pub fn discover_workdir<P: AsRef<Path>>(path: P) -> Result<PathBuf, GitError> {
    let repo = Repository::discover(path.as_ref())
        .map_err(|e| GitError::NotARepo(format!("{}: {}", path.as_ref().display(), e)))?;
    Ok(get_workdir(&repo).to_path_buf())
}

/// Check if a path is a git repository
pub fn is_git_repo<P: AsRef<Path>>(path: P) -> bool {
    Repository::open(path.as_ref()).is_ok()
}

/// Check if a git lock file exists (`.git/index.lock`).
///
/// Returns the lock file path if it exists.
pub fn git_lock_exists(repo: &Repository) -> Option<PathBuf> {
    let lock_path = repo.path().join("index.lock");
    if lock_path.exists() {
        Some(lock_path)
    } else {
        None
    }
}

/// Wait for a git lock to be released with exponential backoff.
///
/// Returns `Ok(())` if the lock is released within the retry window,
/// or `Err(GitError::RepositoryLocked)` if it times out.
pub fn wait_for_git_lock(repo: &Repository) -> Result<(), GitError> {
    let max_attempts: u32 = 5;
    let initial_delay_ms: u64 = 200;
    let max_delay_ms: u64 = 5000;

    for attempt in 0..max_attempts {
        if git_lock_exists(repo).is_none() {
            return Ok(());
        }

        let delay_ms = (initial_delay_ms * 2u64.pow(attempt)).min(max_delay_ms);
        std::thread::sleep(std::time::Duration::from_millis(delay_ms));
    }

    if git_lock_exists(repo).is_none() {
        return Ok(());
    }

    Err(GitError::RepositoryLocked(format!(
        "{}: index.lock exists, another git process may be running",
        get_workdir(repo).display()
    )))
}

/// Clone a repository into `path`, optionally checking out `branch`.
pub fn clone_repo<P: AsRef<Path>>(
    url: &str,
    path: P,
    branch: Option<&str>,
) -> Result<Repository, GitError> {
    let path = path.as_ref();

    let mut cmd = Command::new("git");
    cmd.arg("clone");
    if let Some(b) = branch {
        cmd.args(["-b", b]);
    }
    cmd.arg(url).arg(path);
    log_cmd(&cmd);
    let output = cmd
        .output()
        .map_err(|e| GitError::OperationFailed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::OperationFailed(format!(
            "git clone failed: {}",
            stderr.trim()
        )));
    }

    open_repo(path)
}

/// Get the working directory of a repository
/// Works correctly for both regular repos and worktrees
pub fn get_workdir(repo: &Repository) -> &Path {
    repo.workdir().unwrap_or_else(|| repo.path())
}

/// Path of autorun's private state directory (`.git/autorun`).
pub fn autorun_dir(repo: &Repository) -> PathBuf {
    repo.path().join(AUTORUN_DIR)
}

/// Get the current branch name, or `None` when HEAD is detached.
pub fn current_branch(repo: &Repository) -> Result<Option<String>, GitError> {
    let head = repo
        .head()
        .map_err(|e| GitError::Reference(e.to_string()))?;

    if head.is_branch() {
        Ok(head.shorthand().map(|s| s.to_string()))
    } else {
        Ok(None)
    }
}

/// Full id of the commit HEAD points at.
pub fn head_commit_id(repo: &Repository) -> Result<String, GitError> {
    let commit = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(|e| GitError::Reference(e.to_string()))?;
    Ok(commit.id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
        assert!(
            output.status.success(),
            "git {:?} failed in {}: {}",
            args,
            dir.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn setup_repo_with_commit() -> TempDir {
        let temp = TempDir::new().unwrap();
        git(temp.path(), &["init", "-b", "main"]);
        git(temp.path(), &["config", "user.email", "test@example.com"]);
        git(temp.path(), &["config", "user.name", "Test User"]);
        fs::write(temp.path().join("README.md"), "# Test").unwrap();
        git(temp.path(), &["add", "README.md"]);
        git(temp.path(), &["commit", "-m", "Initial commit"]);
        temp
    }

    #[test]
    fn test_is_git_repo() {
        let temp = TempDir::new().unwrap();
        assert!(!is_git_repo(temp.path()));

        Repository::init(temp.path()).unwrap();
        assert!(is_git_repo(temp.path()));
    }

    #[test]
    fn test_open_repo() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(open_repo(temp.path()), Err(GitError::NotARepo(_))));

        Repository::init(temp.path()).unwrap();
        assert!(open_repo(temp.path()).is_ok());
    }

    #[test]
    fn test_discover_workdir_from_subdirectory() {
        let temp = setup_repo_with_commit();
        let nested = temp.path().join("data/2024");
        fs::create_dir_all(&nested).unwrap();

        let workdir = discover_workdir(&nested).unwrap();
        assert_eq!(
            workdir.canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_current_branch_and_detached_head() {
        let temp = setup_repo_with_commit();
        let repo = open_repo(temp.path()).unwrap();
        assert_eq!(current_branch(&repo).unwrap(), Some("main".to_string()));

        let sha = head_commit_id(&repo).unwrap();
        git(temp.path(), &["checkout", "--detach", &sha]);
        let repo = open_repo(temp.path()).unwrap();
        assert_eq!(current_branch(&repo).unwrap(), None);
    }

    #[test]
    fn test_autorun_dir_lives_inside_git_dir() {
        let temp = setup_repo_with_commit();
        let repo = open_repo(temp.path()).unwrap();
        let dir = autorun_dir(&repo);
        assert!(dir.starts_with(repo.path()));
        assert!(dir.ends_with(AUTORUN_DIR));
    }

    #[test]
    fn test_wait_for_git_lock() {
        let temp = setup_repo_with_commit();
        let repo = open_repo(temp.path()).unwrap();
        assert!(git_lock_exists(&repo).is_none());
        assert!(wait_for_git_lock(&repo).is_ok());

        fs::write(repo.path().join("index.lock"), "").unwrap();
        let err = wait_for_git_lock(&repo).unwrap_err();
        assert!(err.to_string().contains("index.lock"));
    }

    #[test]
    fn test_clone_repo_invalid_url_fails() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");
        let result = clone_repo("file:///does-not-exist/repo.git", &dest, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_clone_repo_from_local_path() {
        let source = setup_repo_with_commit();
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("clone");

        let url = format!("file://{}", source.path().display());
        let repo = clone_repo(&url, &dest, Some("main")).unwrap();
        assert_eq!(current_branch(&repo).unwrap(), Some("main".to_string()));
        assert!(dest.join("README.md").exists());
    }
}
