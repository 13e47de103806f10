//! Workflow file location helpers.
//!
//! Looks for `autorun.yaml` (or `autorun.yml`, `.autorun.yaml`) in a
//! directory and its ancestors, the same way `git` finds `.git`.

use std::path::{Path, PathBuf};

pub const PRIMARY_FILE_NAME: &str = "autorun.yaml";
pub const ALTERNATE_FILE_NAMES: [&str; 2] = ["autorun.yml", ".autorun.yaml"];

/// Path `autorun init` writes to inside `dir`.
pub fn default_workflow_path(dir: &Path) -> PathBuf {
    dir.join(PRIMARY_FILE_NAME)
}

/// Workflow file directly inside `dir`, primary name first.
pub fn resolve_workflow_file_in_dir(dir: &Path) -> Option<PathBuf> {
    let primary = dir.join(PRIMARY_FILE_NAME);
    if primary.is_file() {
        return Some(primary);
    }

    ALTERNATE_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Walk up from `start` until a directory containing a workflow file is found.
pub fn find_workflow(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(resolve_workflow_file_in_dir)
}
