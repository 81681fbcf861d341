//! Operator-mode CLI handlers for `conclave worktree` subcommands.

use std::path::PathBuf;

use anyhow::Result;
use conclave_core::worktree::PullMergeResult;

use crate::context::Context;
use crate::WorktreeCommands;

pub fn run_worktree_command(command: WorktreeCommands, ctx: &Context) -> Result<()> {
    match command {
        WorktreeCommands::List => cmd_list(ctx),
        WorktreeCommands::PullMerge {
            parent,
            child,
            no_cleanup,
        } => cmd_pull_merge(ctx, parent, child, !no_cleanup),
        WorktreeCommands::Remove { path } => cmd_remove(ctx, path),
    }
}

fn cmd_list(ctx: &Context) -> Result<()> {
    let worktrees = ctx.worktrees.list_worktrees()?;
    if worktrees.is_empty() {
        println!("No worktrees.");
        return Ok(());
    }

    for wt in &worktrees {
        println!(
            "{}  {}  {}",
            wt.path.display(),
            wt.branch.as_deref().unwrap_or("(detached)"),
            &wt.head_commit[..wt.head_commit.len().min(12)],
        );
    }
    Ok(())
}

fn cmd_pull_merge(ctx: &Context, parent: PathBuf, child: PathBuf, cleanup: bool) -> Result<()> {
    match ctx.worktrees.pull_merge(&parent, &child, cleanup)? {
        PullMergeResult::Success { merged_files } => {
            println!("Merge succeeded ({} file(s)):", merged_files.len());
            for file in &merged_files {
                println!("  {file}");
            }
        }
        PullMergeResult::Conflict { conflict_files } => {
            println!("Merge conflict in {} file(s):", conflict_files.len());
            for file in &conflict_files {
                println!("  {file}");
            }
            anyhow::bail!("resolve conflicts in {} before retrying", parent.display());
        }
    }
    Ok(())
}

fn cmd_remove(ctx: &Context, path: PathBuf) -> Result<()> {
    ctx.worktrees.remove_worktree(&path)?;
    println!("Worktree {} removed.", path.display());
    Ok(())
}
