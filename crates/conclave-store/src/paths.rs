//! Workspace-relative paths for the two state files.

use std::path::{Path, PathBuf};

/// Resolves the two state-file paths relative to a workspace root.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub workspace: PathBuf,
}

impl StorePaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.workspace.join(".copilot-orchestrator-state.json")
    }

    pub fn queue_file(&self) -> PathBuf {
        self.workspace.join(".copilot-orchestrator-queue.json")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.workspace.join(".worktrees")
    }

    pub fn worktree_path_for(&self, sanitized_name: &str) -> PathBuf {
        self.worktrees_dir().join(sanitized_name)
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}
