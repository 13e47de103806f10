//! Staging and no-op-safe commit creation

use git2::{IndexAddOption, Repository, Signature};

use super::GitError;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Name and contact address recorded on commits made by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Write `user.name` / `user.email` into the repository's local config.
pub fn configure_identity(repo: &Repository, identity: &Identity) -> Result<(), GitError> {
    let mut config = repo.config()?.open_level(git2::ConfigLevel::Local)?;
    config.set_str("user.name", &identity.name)?;
    config.set_str("user.email", &identity.email)?;
    Ok(())
}

/// Stage every change in the working tree: new, modified and deleted files.
///
/// Ignored files stay unstaged. Returns the number of paths that differ
/// between HEAD and the index afterwards.
#[cfg_attr(feature = "telemetry", instrument(skip(repo)))]
pub fn stage_all(repo: &Repository) -> Result<usize, GitError> {
    let mut index = repo.index()?;
    // The git CLI may have rewritten the index since it was cached
    index.read(true)?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;

    staged_paths(repo).map(|paths| paths.len())
}

/// Paths whose index entry differs from HEAD.
pub fn staged_paths(repo: &Repository) -> Result<Vec<String>, GitError> {
    let head = match repo.head() {
        Ok(head) => Some(head.peel_to_tree()?),
        Err(_) => None, // No HEAD yet (empty repo)
    };

    let mut index = repo.index()?;
    index.read(true)?;
    let diff = repo.diff_tree_to_index(head.as_ref(), Some(&index), None)?;
    Ok(diff
        .deltas()
        .filter_map(|d| {
            d.new_file()
                .path()
                .or_else(|| d.old_file().path())
                .map(|p| p.to_string_lossy().to_string())
        })
        .collect())
}

/// Check if a repository has staged changes
pub fn has_staged_changes(repo: &Repository) -> Result<bool, GitError> {
    Ok(!staged_paths(repo)?.is_empty())
}

/// Commit the staged changes under `label` if and only if there are any.
///
/// Returns the new commit id, or `None` when nothing was staged. The empty
/// case is not an error.
#[cfg_attr(feature = "telemetry", instrument(skip(repo)))]
pub fn safe_commit(repo: &Repository, label: &str) -> Result<Option<String>, GitError> {
    if !has_staged_changes(repo)? {
        tracing::info!("Nothing staged, skipping commit");
        return Ok(None);
    }

    let signature = get_signature(repo)?;
    let mut index = repo.index()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(_) => None, // Initial commit
    };
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    let commit_id = repo.commit(Some("HEAD"), &signature, &signature, label, &tree, &parents)?;
    tracing::info!(commit = %commit_id, "Created commit");

    Ok(Some(commit_id.to_string()))
}

/// Get the signature for commits
fn get_signature(repo: &Repository) -> Result<Signature<'static>, GitError> {
    match repo.signature() {
        Ok(sig) => Ok(Signature::now(
            sig.name().unwrap_or("autorun"),
            sig.email().unwrap_or("autorun@localhost"),
        )?),
        Err(_) => {
            // Fall back to environment variables
            let name = std::env::var("GIT_AUTHOR_NAME")
                .or_else(|_| std::env::var("USER"))
                .unwrap_or_else(|_| "autorun".to_string());
            let email = std::env::var("GIT_AUTHOR_EMAIL")
                .unwrap_or_else(|_| "autorun@localhost".to_string());
            Ok(Signature::now(&name, &email)?)
        }
    }
}
