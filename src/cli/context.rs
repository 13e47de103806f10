//! Workflow context passed to command handlers
//!
//! Bundles the loaded workflow, the repository it governs and the global
//! CLI flags into a single struct.

use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::core::workflow::Workflow;
use crate::core::workflow_paths::find_workflow;
use crate::git;

/// Global flags shared by every command
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalFlags {
    /// Suppress non-essential output (`--quiet`)
    pub quiet: bool,
    /// Show verbose output (`--verbose`)
    pub verbose: bool,
    /// Output in JSON format (`--json`)
    pub json: bool,
}

impl GlobalFlags {
    /// Human-readable progress should be printed
    pub fn interactive(&self) -> bool {
        !self.quiet && !self.json
    }
}

/// Workflow context available to command handlers.
pub struct WorkflowContext {
    /// Path of the workflow file
    pub workflow_path: PathBuf,
    /// Working directory of the repository the workflow lives in
    pub repo_root: PathBuf,
    /// Parsed and validated workflow
    pub workflow: Workflow,
    pub flags: GlobalFlags,
}

impl WorkflowContext {
    /// Load the workflow from `explicit`, or search upwards from `start`.
    pub fn load(explicit: Option<&Path>, start: &Path, flags: GlobalFlags) -> anyhow::Result<Self> {
        let workflow_path = locate_workflow(explicit, start)?;
        let workflow = Workflow::load(&workflow_path)
            .with_context(|| format!("Invalid workflow {}", workflow_path.display()))?;

        let workflow_dir = workflow_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| start.to_path_buf());
        let repo_root = git::discover_workdir(&workflow_dir).unwrap_or(workflow_dir);

        Ok(Self {
            workflow_path,
            repo_root,
            workflow,
            flags,
        })
    }

    /// Get the repository root as a `&Path`
    pub fn root(&self) -> &Path {
        &self.repo_root
    }
}

/// Resolve the workflow file path without parsing it.
pub fn locate_workflow(explicit: Option<&Path>, start: &Path) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                start.join(path)
            };
            if !path.is_file() {
                anyhow::bail!("Workflow file not found: {}", path.display());
            }
            Ok(path)
        }
        None => find_workflow(start).ok_or_else(|| {
            anyhow::anyhow!(
                "No autorun.yaml found in {} or any parent directory (run `autorun init` to create one)",
                start.display()
            )
        }),
    }
}
