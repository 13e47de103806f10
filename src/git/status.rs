//! Git status operations

use git2::Repository;
use std::process::Command;

use super::GitError;
use crate::util::log_cmd;

/// Working tree status information
#[derive(Debug, Clone, Default)]
pub struct WorktreeStatus {
    /// Is the working directory clean
    pub is_clean: bool,
    /// Staged files
    pub staged: Vec<String>,
    /// Modified files (not staged)
    pub modified: Vec<String>,
    /// Untracked files
    pub untracked: Vec<String>,
}

impl WorktreeStatus {
    /// Every path with any kind of pending change, deduplicated.
    pub fn changed_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .staged
            .iter()
            .chain(self.modified.iter())
            .chain(self.untracked.iter())
            .cloned()
            .collect();
        files.sort();
        files.dedup();
        files
    }
}

/// Get working tree status using porcelain output
pub fn get_status_info(repo: &Repository) -> Result<WorktreeStatus, GitError> {
    let repo_path = super::get_workdir(repo);

    let mut cmd = Command::new("git");
    cmd.args(["status", "--porcelain=v1", "--untracked-files=all"])
        .current_dir(repo_path);
    log_cmd(&cmd);
    let output = cmd
        .output()
        .map_err(|e| GitError::OperationFailed(e.to_string()))?;

    if !output.status.success() {
        return Err(GitError::OperationFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(parse_porcelain(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_porcelain(stdout: &str) -> WorktreeStatus {
    let mut staged = Vec::new();
    let mut modified = Vec::new();
    let mut untracked = Vec::new();

    for line in stdout.lines() {
        if line.len() < 3 {
            continue;
        }
        let index_status = line.chars().next().unwrap_or(' ');
        let worktree_status = line.chars().nth(1).unwrap_or(' ');
        let path = line[3..].to_string();

        if matches!(index_status, 'A' | 'M' | 'D' | 'R' | 'C') {
            staged.push(path.clone());
        }

        if matches!(worktree_status, 'M' | 'D') {
            modified.push(path.clone());
        }

        if index_status == '?' && worktree_status == '?' {
            untracked.push(path);
        }
    }

    let is_clean = staged.is_empty() && modified.is_empty() && untracked.is_empty();

    WorktreeStatus {
        is_clean,
        staged,
        modified,
        untracked,
    }
}

/// Check if there are uncommitted changes
pub fn has_uncommitted_changes(repo: &Repository) -> Result<bool, GitError> {
    let status = get_status_info(repo)?;
    Ok(!status.is_clean)
}

/// Move the current branch and working tree to `rev`, dropping local edits.
pub fn reset_hard(repo: &Repository, rev: &str) -> Result<(), GitError> {
    run_checked(repo, &["reset", "--hard", "--quiet", rev])
}

/// Restore the working tree to HEAD: tracked edits are reverted and
/// untracked files and directories removed. Ignored files are kept.
pub fn discard_changes(repo: &Repository) -> Result<(), GitError> {
    reset_hard(repo, "HEAD")?;
    run_checked(repo, &["clean", "-fd", "--quiet"])
}

fn run_checked(repo: &Repository, args: &[&str]) -> Result<(), GitError> {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(super::get_workdir(repo));
    log_cmd(&cmd);
    let output = cmd
        .output()
        .map_err(|e| GitError::OperationFailed(e.to_string()))?;

    if !output.status.success() {
        return Err(GitError::OperationFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}
