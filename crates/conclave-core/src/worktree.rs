//! The worktree coordinator: default-branch detection, per-worker
//! worktree creation, status/diff, and the parent/child pull-merge and
//! completion/push protocols.
//!
//! Built atop a `Command`-based git wrapper: idempotent create/remove, a
//! mutex serializing mutating operations against git's own lock file,
//! a fixed path layout, branch sanitization, and the two multi-step
//! pull-merge and completion/push protocols.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use conclave_store::StorePaths;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to parse worktree list output: {0}")]
    ParseError(String),

    #[error("could not detect a default branch (no origin/HEAD, no main, no master)")]
    NoDefaultBranch,
}

fn run(repo: &Path, args: &[&str]) -> Result<std::process::Output, WorktreeError> {
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| WorktreeError::GitCommand {
            message: format!("failed to run git {}", args.join(" ")),
            source: e,
        })
}

fn ok_output(command: &str, output: std::process::Output) -> Result<std::process::Output, WorktreeError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(WorktreeError::GitExit {
            command: command.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Lowercase, replace any character outside `[a-z0-9-]` with `-`,
/// collapse runs of `-`, strip leading/trailing `-`, truncate to 50
/// characters.
pub fn sanitize_branch_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut replaced = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            replaced.push(c);
        } else {
            replaced.push('-');
        }
    }
    let mut collapsed = String::with_capacity(replaced.len());
    let mut last_was_dash = false;
    for c in replaced.chars() {
        if c == '-' {
            if !last_was_dash {
                collapsed.push(c);
            }
            last_was_dash = true;
        } else {
            collapsed.push(c);
            last_was_dash = false;
        }
    }
    let trimmed = collapsed.trim_matches('-');
    trimmed.chars().take(50).collect::<String>().trim_matches('-').to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head_commit: String,
}

/// Outcome of the parent/child pull-merge protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullMergeResult {
    Success { merged_files: Vec<String> },
    Conflict { conflict_files: Vec<String> },
}

pub struct WorktreeCoordinator {
    /// Path to the main repository (the parent/root worktree).
    repo_path: PathBuf,
    paths: StorePaths,
    git_lock: Arc<Mutex<()>>,
}

impl WorktreeCoordinator {
    pub fn new(repo_path: impl Into<PathBuf>) -> Result<Self, WorktreeError> {
        let repo_path = repo_path.into();
        let output = run(&repo_path, &["rev-parse", "--git-dir"])?;
        if !output.status.success() {
            return Err(WorktreeError::NotAGitRepo(repo_path));
        }
        Ok(Self {
            paths: StorePaths::new(repo_path.clone()),
            repo_path,
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.paths.worktrees_dir()
    }

    /// Detect the default branch: the origin HEAD symbolic ref, falling
    /// back to probing `main` then `master`.
    pub fn detect_default_branch(&self) -> Result<String, WorktreeError> {
        let output = run(&self.repo_path, &["symbolic-ref", "refs/remotes/origin/HEAD"]);
        if let Ok(output) = output {
            if output.status.success() {
                let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if let Some(branch) = raw.strip_prefix("refs/remotes/origin/") {
                    return Ok(branch.to_string());
                }
            }
        }
        if self.branch_exists("main")? {
            return Ok("main".to_string());
        }
        if self.branch_exists("master")? {
            return Ok("master".to_string());
        }
        Err(WorktreeError::NoDefaultBranch)
    }

    pub fn branch_exists(&self, branch_name: &str) -> Result<bool, WorktreeError> {
        let output = run(
            &self.repo_path,
            &["rev-parse", "--verify", &format!("refs/heads/{branch_name}")],
        )?;
        Ok(output.status.success())
    }

    /// Create (or return the existing) worktree for `sanitized_name` off
    /// `base_branch`, at `<workspaceParent>/.worktrees/<sanitized_name>`.
    pub fn create_worktree(
        &self,
        sanitized_name: &str,
        base_branch: &str,
    ) -> Result<WorktreeInfo, WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let worktree_path = self.paths.worktree_path_for(sanitized_name);

        if worktree_path.exists() {
            if let Ok(existing) = self.find_worktree_by_path(&worktree_path) {
                return Ok(existing);
            }
        }

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WorktreeError::GitCommand {
                message: format!("failed to create worktrees directory {}", parent.display()),
                source: e,
            })?;
        }

        let branch_already_exists = self.branch_exists(sanitized_name)?;
        let output = if branch_already_exists {
            run(
                &self.repo_path,
                &["worktree", "add", worktree_path.to_str().unwrap(), sanitized_name],
            )?
        } else {
            run(
                &self.repo_path,
                &[
                    "worktree",
                    "add",
                    "-b",
                    sanitized_name,
                    worktree_path.to_str().unwrap(),
                    base_branch,
                ],
            )?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if worktree_path.exists() {
                let _ = std::fs::remove_dir_all(&worktree_path);
            }
            return Err(WorktreeError::GitExit {
                command: "worktree add".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        self.find_worktree_by_path(&worktree_path)
    }

    pub fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.find_worktree_by_path(path).is_err() {
            if path.exists() {
                let _ = std::fs::remove_dir_all(path);
            }
            return Ok(());
        }
        let output = run(&self.repo_path, &["worktree", "remove", "--force", path.to_str().unwrap()])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("is not a working tree") {
                return Ok(());
            }
            return Err(WorktreeError::GitExit {
                command: "worktree remove".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(())
    }

    pub fn delete_branch(&self, branch_name: &str) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let output = run(&self.repo_path, &["branch", "-D", branch_name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("not found") {
                return Ok(());
            }
            return Err(WorktreeError::GitExit {
                command: "branch -D".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(())
    }

    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        let output = run(&self.repo_path, &["worktree", "list", "--porcelain"])?;
        let output = ok_output("worktree list", output)?;
        parse_porcelain_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn find_worktree_by_path(&self, path: &Path) -> Result<WorktreeInfo, WorktreeError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        for wt in self.list_worktrees()? {
            let wt_canonical = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
            if wt_canonical == canonical {
                return Ok(wt);
            }
        }
        Err(WorktreeError::ParseError(format!(
            "worktree not found at path: {}",
            path.display()
        )))
    }

    /// `git status --porcelain` in `worktree_path`.
    pub fn status(&self, worktree_path: &Path) -> Result<Vec<String>, WorktreeError> {
        let output = run(worktree_path, &["status", "--porcelain"])?;
        let output = ok_output("status", output)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    /// `git diff --name-status` in `worktree_path` (working tree vs index).
    pub fn diff_name_status(&self, worktree_path: &Path) -> Result<Vec<String>, WorktreeError> {
        let output = run(worktree_path, &["diff", "--name-status"])?;
        let output = ok_output("diff --name-status", output)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|l| l.split_whitespace().last())
            .map(|s| s.to_string())
            .collect())
    }

    fn conflicted_files(&self, worktree_path: &Path) -> Result<Vec<String>, WorktreeError> {
        let output = run(worktree_path, &["diff", "--name-only", "--diff-filter=U"])?;
        let output = ok_output("diff --name-only --diff-filter=U", output)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    fn current_branch(&self, worktree_path: &Path) -> Result<String, WorktreeError> {
        let output = run(worktree_path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let output = ok_output("rev-parse --abbrev-ref HEAD", output)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn has_uncommitted_changes(&self, worktree_path: &Path) -> Result<bool, WorktreeError> {
        Ok(!self.status(worktree_path)?.is_empty())
    }

    /// The parent/child pull-merge protocol:
    /// 1. auto-commit uncommitted changes in the child worktree,
    /// 2. determine child/parent branches,
    /// 3. `merge --no-commit --no-ff childBranch` from the parent worktree,
    /// 4. on conflict, collect unmerged files and leave the parent index
    ///    in the conflicted state,
    /// 5. on clean success, leave changes staged for the caller to commit,
    /// 6. if `cleanup` and the merge was clean, remove the child worktree
    ///    and delete its branch, ignoring failures.
    pub fn pull_merge(
        &self,
        parent_worktree: &Path,
        child_worktree: &Path,
        cleanup: bool,
    ) -> Result<PullMergeResult, WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.has_uncommitted_changes(child_worktree)? {
            run(child_worktree, &["add", "-A"])?;
            let output = run(child_worktree, &["commit", "-m", "wip: auto-commit before pull-merge"])?;
            ok_output("commit", output)?;
        }

        let child_branch = self.current_branch(child_worktree)?;

        let output = run(
            parent_worktree,
            &["merge", "--no-commit", "--no-ff", &child_branch],
        )?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if stderr.contains("CONFLICT") || stdout.contains("CONFLICT") || stderr.contains("Automatic merge failed") {
                let conflict_files = self.conflicted_files(parent_worktree)?;
                return Ok(PullMergeResult::Conflict { conflict_files });
            }
            return Err(WorktreeError::GitExit {
                command: "merge --no-commit --no-ff".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let merged_files = self.diff_name_status_staged(parent_worktree)?;

        if cleanup {
            let _ = self.remove_worktree(child_worktree);
            let _ = self.delete_branch(&child_branch);
        }

        Ok(PullMergeResult::Success { merged_files })
    }

    /// Files staged relative to HEAD (`git diff --name-only --cached`),
    /// used after a clean `--no-commit` merge to report what the caller
    /// is about to commit.
    fn diff_name_status_staged(&self, worktree_path: &Path) -> Result<Vec<String>, WorktreeError> {
        let output = run(worktree_path, &["diff", "--name-only", "--cached"])?;
        let output = ok_output("diff --name-only --cached", output)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    /// Abort an in-progress conflicted merge in `parent_worktree`,
    /// leaving the user's manual resolution attempt untouched if none is
    /// in progress.
    pub fn abort_merge(&self, parent_worktree: &Path) -> Result<(), WorktreeError> {
        let _ = run(parent_worktree, &["merge", "--abort"])?;
        Ok(())
    }

    /// The completion/push path: commit everything in
    /// the worker worktree (allowing an empty commit so a sub-agent that
    /// made no file changes still signals completion), push the branch,
    /// then remove the worktree from the workspace root.
    pub fn complete_and_push(
        &self,
        worker_worktree: &Path,
        branch_name: &str,
        task_name: &str,
    ) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        run(worker_worktree, &["add", "-A"])?;
        let commit_msg = format!("Complete task: {task_name}");
        let output = run(worker_worktree, &["commit", "-m", &commit_msg, "--allow-empty"])?;
        ok_output("commit --allow-empty", output)?;

        let output = run(worker_worktree, &["push", "-u", "origin", branch_name])?;
        ok_output("push -u origin", output)?;

        drop(_lock);
        self.remove_worktree(worker_worktree)
    }
}

fn parse_porcelain_output(output: &str) -> Result<Vec<WorktreeInfo>, WorktreeError> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    let flush = |path: &mut Option<PathBuf>, head: &mut Option<String>, branch: &mut Option<String>, out: &mut Vec<WorktreeInfo>| {
        if let (Some(p), Some(h)) = (path.take(), head.take()) {
            out.push(WorktreeInfo {
                path: p,
                branch: branch.take(),
                head_commit: h,
            });
        } else {
            *path = None;
            *head = None;
            *branch = None;
        }
    };

    for line in output.lines() {
        if line.is_empty() {
            flush(&mut current_path, &mut current_head, &mut current_branch, &mut worktrees);
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            current_branch = Some(rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string());
        }
    }
    flush(&mut current_path, &mut current_head, &mut current_branch, &mut worktrees);
    Ok(worktrees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().to_path_buf();
        let run_git = |args: &[&str]| {
            let output = Command::new("git").args(args).current_dir(&repo_path).output().unwrap();
            assert!(output.status.success(), "git {} failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr));
        };
        run_git(&["init", "-b", "main"]);
        run_git(&["config", "user.email", "test@conclave.dev"]);
        run_git(&["config", "user.name", "Conclave Test"]);
        std::fs::write(repo_path.join("README.md"), "# Test\n").unwrap();
        run_git(&["add", "."]);
        run_git(&["commit", "-m", "Initial commit"]);
        (dir, repo_path)
    }

    #[test]
    fn sanitize_lowercases_and_replaces_invalid_chars() {
        assert_eq!(sanitize_branch_name("Fix Bug #42!"), "fix-bug-42");
    }

    #[test]
    fn sanitize_collapses_runs_and_strips_edges() {
        assert_eq!(sanitize_branch_name("--a___b--"), "a-b");
    }

    #[test]
    fn sanitize_truncates_to_fifty() {
        let long = "a".repeat(80);
        assert_eq!(sanitize_branch_name(&long).len(), 50);
    }

    #[test]
    fn detects_main_as_default_branch() {
        let (_dir, repo_path) = create_temp_repo();
        let coord = WorktreeCoordinator::new(&repo_path).unwrap();
        assert_eq!(coord.detect_default_branch().unwrap(), "main");
    }

    #[test]
    fn create_worktree_is_idempotent() {
        let (_dir, repo_path) = create_temp_repo();
        let coord = WorktreeCoordinator::new(&repo_path).unwrap();
        let a = coord.create_worktree("my-task", "main").unwrap();
        let b = coord.create_worktree("my-task", "main").unwrap();
        assert_eq!(a.path, b.path);
        assert_eq!(a.path, repo_path.join(".worktrees").join("my-task"));
    }

    /// Child modifies files a.txt/b.txt, parent modifies neither;
    /// pull_merge succeeds and parent status shows both staged.
    #[test]
    fn clean_merge_stages_union_of_changed_files() {
        let (_dir, repo_path) = create_temp_repo();
        let coord = WorktreeCoordinator::new(&repo_path).unwrap();
        let child = coord.create_worktree("child-task", "main").unwrap();

        std::fs::write(child.path.join("a.txt"), "a").unwrap();
        std::fs::write(child.path.join("b.txt"), "b").unwrap();
        let add = Command::new("git").args(["add", "-A"]).current_dir(&child.path).output().unwrap();
        assert!(add.status.success());
        let commit = Command::new("git")
            .args(["commit", "-m", "add files"])
            .current_dir(&child.path)
            .output()
            .unwrap();
        assert!(commit.status.success());

        let result = coord.pull_merge(&repo_path, &child.path, false).unwrap();
        match result {
            PullMergeResult::Success { mut merged_files } => {
                merged_files.sort();
                assert_eq!(merged_files, vec!["a.txt", "b.txt"]);
            }
            other => panic!("expected success, got {other:?}"),
        }

        let status = coord.status(&repo_path).unwrap();
        assert_eq!(status.len(), 2);
    }

    #[test]
    fn pull_merge_reports_conflicts() {
        let (_dir, repo_path) = create_temp_repo();
        let coord = WorktreeCoordinator::new(&repo_path).unwrap();
        let child = coord.create_worktree("conflict-task", "main").unwrap();

        std::fs::write(child.path.join("README.md"), "child version\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(&child.path).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "child edit"])
            .current_dir(&child.path)
            .output()
            .unwrap();

        std::fs::write(repo_path.join("README.md"), "parent version\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(&repo_path).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "parent edit"])
            .current_dir(&repo_path)
            .output()
            .unwrap();

        let result = coord.pull_merge(&repo_path, &child.path, false).unwrap();
        match result {
            PullMergeResult::Conflict { conflict_files } => {
                assert_eq!(conflict_files, vec!["README.md".to_string()]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        coord.abort_merge(&repo_path).unwrap();
    }

    #[test]
    fn pull_merge_auto_commits_uncommitted_child_changes() {
        let (_dir, repo_path) = create_temp_repo();
        let coord = WorktreeCoordinator::new(&repo_path).unwrap();
        let child = coord.create_worktree("dirty-task", "main").unwrap();

        std::fs::write(child.path.join("dirty.txt"), "uncommitted").unwrap();

        let result = coord.pull_merge(&repo_path, &child.path, false).unwrap();
        assert!(matches!(result, PullMergeResult::Success { .. }));
        assert!(coord.status(&child.path).unwrap().is_empty());
    }

    #[test]
    fn cleanup_true_removes_worktree_and_branch_on_clean_merge() {
        let (_dir, repo_path) = create_temp_repo();
        let coord = WorktreeCoordinator::new(&repo_path).unwrap();
        let child = coord.create_worktree("cleanup-task", "main").unwrap();
        std::fs::write(child.path.join("x.txt"), "x").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(&child.path).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "x"])
            .current_dir(&child.path)
            .output()
            .unwrap();

        coord.pull_merge(&repo_path, &child.path, true).unwrap();
        assert!(!child.path.exists());
        assert!(!coord.branch_exists("cleanup-task").unwrap());
    }
}
