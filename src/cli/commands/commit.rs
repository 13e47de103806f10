//! Commit command implementation
//!
//! `autorun commit <label>` stages everything and commits it under `label`,
//! succeeding quietly when there is nothing to commit.

use serde::Serialize;
use std::path::Path;

use crate::cli::context::GlobalFlags;
use crate::cli::output::Output;
use crate::git;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitResultJson {
    committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_id: Option<String>,
    files: Vec<String>,
}

/// Run the commit command
pub fn run_commit(repo_path: &Path, label: &str, flags: GlobalFlags) -> anyhow::Result<()> {
    let label = label.trim();
    if label.is_empty() || label.contains('\n') {
        anyhow::bail!("Commit label must be a single non-empty line");
    }

    let workdir = git::discover_workdir(repo_path)?;
    let repo = git::open_repo(&workdir)?;
    git::wait_for_git_lock(&repo)?;

    git::stage_all(&repo)?;
    let files = git::staged_paths(&repo)?;
    let commit_id = git::safe_commit(&repo, label)?;

    if flags.json {
        let result = CommitResultJson {
            committed: commit_id.is_some(),
            commit_id,
            files,
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if flags.quiet {
        return Ok(());
    }

    match commit_id {
        Some(id) => {
            Output::success(&format!(
                "Committed {} ({} file{})",
                Output::commit_id(&id),
                files.len(),
                if files.len() == 1 { "" } else { "s" }
            ));
            if flags.verbose {
                for file in &files {
                    Output::list_item(file);
                }
            }
        }
        None => Output::info("Nothing to commit"),
    }

    Ok(())
}
