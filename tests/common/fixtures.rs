//! Test fixtures for creating data repositories.
//!
//! A `DataRepoBuilder` lays out a bare remote plus a working clone holding
//! `autorun.yaml` and a `fetch.sh` entry point, all offline.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use autorun::Workflow;

use super::git_helpers;

/// Workflow used when a test does not supply its own.
pub const DEFAULT_WORKFLOW: &str = r#"name: test-data
on:
  push:
    branches: [main]
  schedule:
    - cron: "0 3,5,9 * * *"
  manual: true
run:
  name: fetch data
  command: sh fetch.sh
push:
  retry_delay_ms: 10
"#;

/// A data repository with its bare remote, cleaned up on drop.
pub struct DataRepoFixture {
    /// Kept alive for the lifetime of the fixture.
    pub _temp: TempDir,
    /// Working clone the runner operates on.
    pub repo_path: PathBuf,
    /// Bare remote the clone pushes to.
    pub remote_path: PathBuf,
    /// Commit both sides start from.
    pub initial_sha: String,
}

impl DataRepoFixture {
    /// The file:// URL of the bare remote.
    pub fn remote_url(&self) -> String {
        format!("file://{}", self.remote_path.display())
    }

    /// Path to the committed workflow file.
    pub fn workflow_path(&self) -> PathBuf {
        self.repo_path.join("autorun.yaml")
    }

    /// Load the committed workflow.
    pub fn workflow(&self) -> Workflow {
        Workflow::load(self.workflow_path()).expect("fixture workflow should load")
    }

    /// Clone the remote a second time, as another writer.
    pub fn other_clone(&self, name: &str) -> PathBuf {
        let dest = self._temp.path().join(name);
        git_helpers::clone_repo(&self.remote_url(), &dest);
        dest
    }

    /// Scratch directory outside any repository.
    pub fn scratch(&self, name: &str) -> PathBuf {
        let dir = self._temp.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Read a file from the working clone.
    pub fn read(&self, file: &str) -> String {
        fs::read_to_string(self.repo_path.join(file)).unwrap()
    }
}

/// Builder for data repositories.
pub struct DataRepoBuilder {
    workflow: String,
    script: String,
    files: Vec<(String, String)>,
}

impl DataRepoBuilder {
    pub fn new() -> Self {
        Self {
            workflow: DEFAULT_WORKFLOW.to_string(),
            script: "true\n".to_string(),
            files: Vec::new(),
        }
    }

    /// Replace the committed `autorun.yaml`.
    pub fn workflow(mut self, yaml: &str) -> Self {
        self.workflow = yaml.to_string();
        self
    }

    /// Contents of `fetch.sh`, run with `sh`.
    pub fn script(mut self, body: &str) -> Self {
        self.script = body.to_string();
        self
    }

    /// Commit an extra file alongside the workflow.
    pub fn file(mut self, name: &str, content: &str) -> Self {
        self.files.push((name.to_string(), content.to_string()));
        self
    }

    pub fn build(self) -> DataRepoFixture {
        let temp = TempDir::new().unwrap();
        let remote_path = temp.path().join("remote.git");
        git_helpers::init_bare_repo(&remote_path);
        let url = format!("file://{}", remote_path.display());

        // Seed the remote from a staging repo
        let staging = temp.path().join("staging");
        git_helpers::init_repo(&staging);
        fs::write(staging.join("README.md"), "# data\n").unwrap();
        fs::write(staging.join("autorun.yaml"), &self.workflow).unwrap();
        fs::write(staging.join("fetch.sh"), &self.script).unwrap();
        for (name, content) in &self.files {
            let path = staging.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        git_helpers::git(&staging, &["add", "-A"]);
        git_helpers::git(&staging, &["commit", "-m", "Initial commit"]);
        git_helpers::add_remote(&staging, "origin", &url);
        git_helpers::push_upstream(&staging, "origin", "main");
        let initial_sha = git_helpers::get_head_sha(&staging);
        fs::remove_dir_all(&staging).unwrap();

        let repo_path = temp.path().join("work");
        git_helpers::clone_repo(&url, &repo_path);

        DataRepoFixture {
            _temp: temp,
            repo_path,
            remote_path,
            initial_sha,
        }
    }
}

impl Default for DataRepoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write an executable script that prints `output` for `--version`.
#[cfg(unix)]
pub fn fake_interpreter(dir: &Path, name: &str, output: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\necho '{}'\n", output)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}
