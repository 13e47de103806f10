//! Init command implementation
//!
//! Writes a starter `autorun.yaml`: python runtime pin, pip setup,
//! `python main.py`, commits labelled `autorun-getdata`, three daily runs.

use std::path::{Path, PathBuf};

use crate::cli::context::GlobalFlags;
use crate::cli::output::Output;
use crate::core::workflow::{Workflow, WORKFLOW_TEMPLATE};
use crate::core::workflow_paths::{default_workflow_path, resolve_workflow_file_in_dir};
use crate::git;

/// Run the init command. Returns the path written.
pub fn run_init(
    dir: Option<&Path>,
    cwd: &Path,
    force: bool,
    flags: GlobalFlags,
) -> anyhow::Result<PathBuf> {
    let target_dir = match dir {
        Some(d) if d.is_absolute() => d.to_path_buf(),
        Some(d) => cwd.join(d),
        None => git::discover_workdir(cwd).unwrap_or_else(|_| cwd.to_path_buf()),
    };

    if let Some(existing) = resolve_workflow_file_in_dir(&target_dir) {
        if !force {
            anyhow::bail!(
                "Workflow already exists at {} (use --force to overwrite)",
                existing.display()
            );
        }
    }

    // The template is part of the binary; refuse to write one that does not load
    Workflow::template()?;

    std::fs::create_dir_all(&target_dir)?;
    let path = default_workflow_path(&target_dir);
    std::fs::write(&path, WORKFLOW_TEMPLATE)?;

    if !flags.quiet && !flags.json {
        Output::success(&format!("Created {}", path.display()));
        if !git::is_git_repo(&target_dir) {
            Output::warning("Not a git repository; `autorun run` needs one");
        }
        Output::info("Edit the setup and run commands, then try `autorun validate`");
    } else if flags.json {
        println!("{}", serde_json::json!({ "path": path.display().to_string() }));
    }

    Ok(path)
}
