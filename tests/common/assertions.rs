//! Custom assertion helpers for autorun integration tests.

use std::path::Path;

use super::git_helpers;

/// Assert that a file exists at the given path.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a file does NOT exist at the given path.
pub fn assert_file_not_exists(path: &Path) {
    assert!(
        !path.exists(),
        "Expected file to NOT exist: {}",
        path.display()
    );
}

/// Assert the repo working tree is clean (no staged, modified, or untracked files).
pub fn assert_repo_clean(repo_path: &Path) {
    let status = git_helpers::git_output(repo_path, &["status", "--porcelain"]);
    assert!(
        status.trim().is_empty(),
        "Expected repo at {} to be clean, but had:\n{}",
        repo_path.display(),
        status
    );
}

/// Assert the local branch and the bare remote's branch point at the same commit.
pub fn assert_in_sync_with_remote(repo_path: &Path, bare_path: &Path, branch: &str) {
    let local = git_helpers::rev_parse(repo_path, branch);
    let remote = git_helpers::remote_branch_sha(bare_path, branch);
    assert_eq!(
        local, remote,
        "Expected {} at {} to match the remote ({})",
        branch,
        repo_path.display(),
        bare_path.display()
    );
}

/// Assert the commit at `rev` has the given subject line.
pub fn assert_commit_subject(repo_path: &Path, rev: &str, expected: &str) {
    let subjects = git_helpers::log_subjects(repo_path, rev, 1);
    assert_eq!(
        subjects.first().map(String::as_str),
        Some(expected),
        "Unexpected commit subject at {} in {}",
        rev,
        repo_path.display()
    );
}
