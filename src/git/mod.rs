//! Git command wrappers.
//!
//! All operations shell out to the `git` binary using
//! `tokio::process::Command` for non-blocking execution.

pub mod commands;

pub use commands::{
    git_available, git_checkout, git_clone_shallow, git_current_branch, git_fetch_deepen,
    git_first_commit_author, git_ls_tree, git_ls_tree_path, git_rev_parse, redact_url,
    CommitAuthor, ShallowClone, TreeEntry,
};
