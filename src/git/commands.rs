//! Git command wrappers using [`tokio::process::Command`].
//!
//! Every function in this module shells out to the system `git` binary.
//! Interactive credential prompts are disabled; credentials travel inside the
//! clone URL and are redacted from every log line.
//!
//! Failures are reported with the trimmed stderr of the git process in the
//! error message so callers can classify them (see
//! [`crate::repo::downloader`]).

use std::collections::HashMap;
use std::path::Path;
use std::process::{Output, Stdio};

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Options for a shallow clone.
#[derive(Debug, Clone)]
pub struct ShallowClone<'a> {
    pub branch: Option<&'a str>,
    pub depth: u32,
    /// Value for `--filter=blob:limit=`; `None` disables the filter.
    pub blob_limit: Option<&'a str>,
    /// `key=value` pairs written into the new repository's config.
    pub config: &'a [String],
}

/// One blob entry of `git ls-tree -r`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub sha: String,
}

/// Author of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn git() -> Command {
    let mut cmd = Command::new("git");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd
}

/// Run `cmd` and fail with `what` plus stderr when git exits non-zero.
async fn run_checked(mut cmd: Command, what: &str) -> Result<Output> {
    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to spawn {what}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{what} failed (status {}): {}",
            output.status,
            redact_url(stderr.trim()),
        );
    }

    Ok(output)
}

/// Replace the userinfo part of any `scheme://user@host` occurrence in `s`
/// with `***`.
pub fn redact_url(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find("://") {
        let (head, tail) = rest.split_at(idx + 3);
        out.push_str(head);
        let end = tail
            .find(|c: char| c.is_whitespace() || c == '/' || c == '\'' || c == '"')
            .unwrap_or(tail.len());
        let authority = &tail[..end];
        match authority.rfind('@') {
            Some(at) => {
                out.push_str("***@");
                out.push_str(&authority[at + 1..]);
            }
            None => out.push_str(authority),
        }
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Version check
// ---------------------------------------------------------------------------

/// Return `true` when `git --version` runs successfully.
pub async fn git_available() -> bool {
    match git().arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(e) => {
            debug!(error = %e, "git binary not available");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Clone
// ---------------------------------------------------------------------------

/// Run `git clone --depth <n> [--filter=blob:limit=<x>] [--branch <b>]
/// [--config <k=v>]... <url> <dest>`.
#[instrument(skip(url, opts), fields(url = %redact_url(url), dest = %dest.display(), depth = opts.depth))]
pub async fn git_clone_shallow(url: &str, dest: &Path, opts: &ShallowClone<'_>) -> Result<()> {
    let mut cmd = git();
    // `-c` covers the clone itself, `--config` persists for later fetches.
    for entry in opts.config {
        cmd.arg("-c").arg(entry);
    }
    cmd.arg("clone").arg(format!("--depth={}", opts.depth));
    if let Some(limit) = opts.blob_limit {
        cmd.arg(format!("--filter=blob:limit={limit}"));
    }
    if let Some(branch) = opts.branch {
        cmd.arg("--branch").arg(branch);
    }
    for entry in opts.config {
        cmd.arg("--config").arg(entry);
    }
    cmd.arg(url).arg(dest);

    debug!("spawning git clone");
    run_checked(cmd, "git clone").await?;
    debug!("git clone succeeded");
    Ok(())
}

// ---------------------------------------------------------------------------
// Checkout / fetch
// ---------------------------------------------------------------------------

/// Run `git checkout <rev>` inside `repo_path`.
#[instrument(fields(repo = %repo_path.display()))]
pub async fn git_checkout(repo_path: &Path, rev: &str) -> Result<()> {
    let mut cmd = git();
    cmd.arg("-C").arg(repo_path).arg("checkout").arg(rev);
    run_checked(cmd, "git checkout").await?;
    Ok(())
}

/// Run `git fetch <remote> --deepen=<n>` to extend a shallow history.
#[instrument(fields(repo = %repo_path.display()))]
pub async fn git_fetch_deepen(repo_path: &Path, remote: &str, depth: u32) -> Result<()> {
    let mut cmd = git();
    cmd.arg("-C")
        .arg(repo_path)
        .arg("fetch")
        .arg(remote)
        .arg(format!("--deepen={depth}"));
    run_checked(cmd, "git fetch --deepen").await?;
    debug!("history deepened");
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Resolve `rev` to a full object id.
pub async fn git_rev_parse(repo_path: &Path, rev: &str) -> Result<String> {
    let mut cmd = git();
    cmd.arg("-C").arg(repo_path).arg("rev-parse").arg(rev);
    let output = run_checked(cmd, "git rev-parse").await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Name of the checked-out branch, or `None` for a detached HEAD.
pub async fn git_current_branch(repo_path: &Path) -> Result<Option<String>> {
    let mut cmd = git();
    cmd.arg("-C")
        .arg(repo_path)
        .arg("rev-parse")
        .arg("--abbrev-ref")
        .arg("HEAD");
    let output = run_checked(cmd, "git rev-parse --abbrev-ref").await?;
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() || name == "HEAD" {
        return Ok(None);
    }
    Ok(Some(name))
}

/// Run `git ls-tree -r -z HEAD` and return a map of `path -> blob entry`.
///
/// Sizes are not requested: with a blob filter in place `-l` would force
/// the missing blobs to be fetched.
#[instrument(fields(repo = %repo_path.display()))]
pub async fn git_ls_tree(repo_path: &Path) -> Result<HashMap<String, TreeEntry>> {
    let mut cmd = git();
    cmd.arg("-C")
        .arg(repo_path)
        .arg("ls-tree")
        .arg("-r")
        .arg("-z")
        .arg("HEAD");
    let output = run_checked(cmd, "git ls-tree").await?;
    let entries = parse_ls_tree(&String::from_utf8_lossy(&output.stdout));
    debug!(entry_count = entries.len(), "git ls-tree complete");
    Ok(entries)
}

/// Run `git ls-tree -z HEAD -- <path>` for a single file.
///
/// `None` when `path` is not a blob at HEAD.
#[instrument(fields(repo = %repo_path.display()))]
pub async fn git_ls_tree_path(repo_path: &Path, path: &str) -> Result<Option<TreeEntry>> {
    let mut cmd = git();
    cmd.arg("-C")
        .arg(repo_path)
        .arg("ls-tree")
        .arg("-z")
        .arg("HEAD")
        .arg("--")
        .arg(path);
    let output = run_checked(cmd, "git ls-tree").await?;
    Ok(parse_ls_tree(&String::from_utf8_lossy(&output.stdout)).remove(path))
}

/// Parse NUL-terminated `<mode> SP <type> SP <oid> TAB <path>` records,
/// keeping blobs only.
fn parse_ls_tree(stdout: &str) -> HashMap<String, TreeEntry> {
    let mut entries = HashMap::new();
    for record in stdout.split('\0') {
        let Some((meta, path)) = record.split_once('\t') else {
            continue;
        };
        let mut fields = meta.split_whitespace();
        let (Some(mode), Some(kind), Some(sha)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if kind != "blob" {
            continue;
        }
        entries.insert(
            path.to_string(),
            TreeEntry {
                mode: mode.to_string(),
                sha: sha.to_string(),
            },
        );
    }
    entries
}

/// Author of the oldest commit reachable from HEAD.  In a shallow clone
/// this is the oldest commit that was fetched.
pub async fn git_first_commit_author(repo_path: &Path) -> Result<Option<CommitAuthor>> {
    let mut cmd = git();
    cmd.arg("-C")
        .arg(repo_path)
        .arg("log")
        .arg("--reverse")
        .arg("--format=%an%x00%ae");
    let output = run_checked(cmd, "git log").await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().find_map(parse_author_line))
}

fn parse_author_line(line: &str) -> Option<CommitAuthor> {
    let (name, email) = line.split_once('\0')?;
    Some(CommitAuthor {
        name: name.to_string(),
        email: email.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
