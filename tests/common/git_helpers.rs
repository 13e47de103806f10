//! Git helper utilities for integration tests.
//!
//! Everything goes through the `git` CLI against local `file://` remotes,
//! so the tests run offline.

use std::fs;
use std::path::Path;
use std::process::Command;

/// Initialize a bare git repository at the given path.
pub fn init_bare_repo(path: &Path) {
    fs::create_dir_all(path).unwrap();
    git(path, &["init", "--bare", "-b", "main"]);
}

/// Initialize a non-bare git repository with user config.
pub fn init_repo(path: &Path) {
    fs::create_dir_all(path).unwrap();
    git(path, &["init", "-b", "main"]);
    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "user.name", "Test User"]);
}

/// Create a file, stage, and commit it. Returns the commit hash.
pub fn commit_file(repo_path: &Path, filename: &str, content: &str, message: &str) -> String {
    let path = repo_path.join(filename);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    git(repo_path, &["add", filename]);
    git(repo_path, &["commit", "-m", message]);
    get_head_sha(repo_path)
}

/// Push with set-upstream.
pub fn push_upstream(repo_path: &Path, remote: &str, branch: &str) {
    git(repo_path, &["push", "-u", remote, branch]);
}

/// Add a remote to a repository.
pub fn add_remote(repo_path: &Path, name: &str, url: &str) {
    git(repo_path, &["remote", "add", name, url]);
}

/// Clone a repository and give the clone its own committer.
pub fn clone_repo(url: &str, dest: &Path) {
    let parent = dest.parent().unwrap();
    fs::create_dir_all(parent).unwrap();
    git(parent, &["clone", url, dest.to_str().unwrap()]);
    git(dest, &["config", "user.email", "other@example.com"]);
    git(dest, &["config", "user.name", "Other User"]);
}

/// Commit a file in `clone` and push it, as another writer would.
pub fn push_from(clone: &Path, filename: &str, content: &str, message: &str) -> String {
    git(clone, &["pull", "--ff-only", "origin", "main"]);
    let sha = commit_file(clone, filename, content, message);
    git(clone, &["push", "origin", "main"]);
    sha
}

/// Get the HEAD commit SHA.
pub fn get_head_sha(repo_path: &Path) -> String {
    rev_parse(repo_path, "HEAD")
}

/// Resolve a revision to its SHA.
pub fn rev_parse(repo_path: &Path, rev: &str) -> String {
    git_output(repo_path, &["rev-parse", rev]).trim().to_string()
}

/// SHA of a branch inside a bare remote.
pub fn remote_branch_sha(bare_path: &Path, branch: &str) -> String {
    rev_parse(bare_path, &format!("refs/heads/{}", branch))
}

/// Whether a branch exists inside a bare remote.
pub fn remote_branch_exists(bare_path: &Path, branch: &str) -> bool {
    Command::new("git")
        .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)])
        .current_dir(bare_path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Number of commits reachable from `rev`.
pub fn commit_count(repo_path: &Path, rev: &str) -> usize {
    git_output(repo_path, &["rev-list", "--count", rev])
        .trim()
        .parse()
        .unwrap()
}

/// Subject lines of the most recent `n` commits on `rev`, newest first.
pub fn log_subjects(repo_path: &Path, rev: &str, n: usize) -> Vec<String> {
    git_output(
        repo_path,
        &["log", "--format=%s", &format!("-{}", n), rev],
    )
    .lines()
    .map(str::to_string)
    .collect()
}

/// Author name of a commit.
pub fn author_name(repo_path: &Path, rev: &str) -> String {
    git_output(repo_path, &["log", "-1", "--format=%an", rev])
        .trim()
        .to_string()
}

/// Get the current branch name.
pub fn current_branch(repo_path: &Path) -> String {
    git_output(repo_path, &["rev-parse", "--abbrev-ref", "HEAD"])
        .trim()
        .to_string()
}

/// Run a git command and assert success.
pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
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

/// Run a git command, assert success, and return stdout.
pub fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}
