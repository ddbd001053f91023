//! Loaders backed by the repository cache.

use std::path::{Component, Path};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::git;
use crate::model::{sha256_hex, Knowledge, Metadata, RepoSourceConfig, SourceConfig, Text};
use crate::registry::Loader;
use crate::repo::{CachedRepo, DownloadMethod, RepoManager};

use super::tree::render_tree;

// ---------------------------------------------------------------------------
// RepoFile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    Utf8,
    Base64,
}

/// A single file read from a cached checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoFile {
    /// File content; base64 when the bytes are not valid UTF-8.
    pub content: String,
    pub encoding: FileEncoding,
    pub path: String,
    pub mode: String,
    /// Browser URL of the file on the forge.
    pub url: String,
    pub branch: String,
    pub repo_name: String,
    pub size: u64,
    pub sha: String,
}

/// Read `path` (relative to the repository root) from the checkout of
/// `config`, fetching the repository first if needed.
#[instrument(skip(repos, config), fields(repo = %config.repo_name))]
pub async fn get_file_by_path(repos: &RepoManager, config: &RepoSourceConfig, path: &str) -> Result<RepoFile> {
    let relative = normalize_relative(path)?;
    let repo = repos.checkout(config).await?;
    let full_path = repo.path.join(&relative);

    match tokio::fs::symlink_metadata(&full_path).await {
        Ok(meta) if meta.file_type().is_symlink() => bail!("refusing to read symbolic link: {relative}"),
        Ok(meta) if meta.is_file() => {}
        _ => bail!("File not found: {relative}"),
    }
    let root = tokio::fs::canonicalize(&repo.path)
        .await
        .with_context(|| format!("failed to resolve {}", repo.path.display()))?;
    let resolved = tokio::fs::canonicalize(&full_path)
        .await
        .with_context(|| format!("failed to resolve {}", full_path.display()))?;
    if !resolved.starts_with(&root) {
        bail!("path escapes the repository: {relative}");
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .with_context(|| format!("failed to read {}", full_path.display()))?;

    let blob = match repo.meta.method {
        DownloadMethod::Git => git::git_ls_tree_path(&repo.path, &relative)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "git ls-tree failed, falling back to content hash");
                None
            }),
        DownloadMethod::Zip => None,
    };
    let (mode, sha) = match blob {
        Some(entry) => (entry.mode, entry.sha),
        None => (file_mode(&full_path).await, sha256_hex(&bytes)),
    };

    let branch = resolve_branch(config, &repo).await;
    let size = bytes.len() as u64;
    let (content, encoding) = match String::from_utf8(bytes) {
        Ok(text) => (text, FileEncoding::Utf8),
        Err(e) => (
            base64::engine::general_purpose::STANDARD.encode(e.into_bytes()),
            FileEncoding::Base64,
        ),
    };

    Ok(RepoFile {
        content,
        encoding,
        url: reference_url(config, &branch, &relative),
        path: relative,
        mode,
        branch,
        repo_name: config.repo_name.clone(),
        size,
        sha,
    })
}

/// Reject absolute and parent-relative paths; return `/`-separated form.
fn normalize_relative(path: &str) -> Result<String> {
    let normalized = path.replace('\\', "/");
    let trimmed = normalized.trim_start_matches("./");
    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => bail!("invalid file path: {path}"),
        }
    }
    if parts.is_empty() {
        bail!("invalid file path: {path}");
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
async fn file_mode(path: &Path) -> String {
    use std::os::unix::fs::PermissionsExt;
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.permissions().mode() & 0o111 != 0 => "100755".to_string(),
        _ => "100644".to_string(),
    }
}

#[cfg(not(unix))]
async fn file_mode(_path: &Path) -> String {
    "100644".to_string()
}

/// Branch used in reference URLs: the configured branch, then the one
/// checked out (or reported by the forge), then `main`.
pub(crate) async fn resolve_branch(config: &RepoSourceConfig, repo: &CachedRepo) -> String {
    if let Some(branch) = config.branch.as_deref().filter(|b| !b.is_empty()) {
        return branch.to_string();
    }
    if repo.meta.method == DownloadMethod::Git {
        match git::git_current_branch(&repo.path).await {
            Ok(Some(branch)) => return branch,
            Ok(None) => {}
            Err(e) => debug!(error = %e, "could not detect active branch"),
        }
    }
    repo.meta
        .default_branch
        .clone()
        .unwrap_or_else(|| "main".to_string())
}

/// `{base}/{repo}/blob/{branch}/{path}`
pub(crate) fn reference_url(config: &RepoSourceConfig, branch: &str, relative: &str) -> String {
    format!(
        "{}/{}/blob/{branch}/{relative}",
        config.base_url(),
        config.repo_name.trim_matches('/')
    )
}

fn repo_config(knowledge: &Knowledge) -> Result<&RepoSourceConfig> {
    knowledge.repo_config().with_context(|| {
        format!(
            "knowledge {} has no repository source config",
            knowledge.knowledge_id
        )
    })
}

// ---------------------------------------------------------------------------
// RepoLoader
// ---------------------------------------------------------------------------

/// Loads a whole repository as its directory tree plus authorship.
#[derive(Debug, Clone)]
pub struct RepoLoader {
    repos: Arc<RepoManager>,
    cleanup_after_load: bool,
}

impl RepoLoader {
    pub fn new(repos: Arc<RepoManager>, cleanup_after_load: bool) -> Self {
        Self {
            repos,
            cleanup_after_load,
        }
    }

    pub async fn get_file_by_path(&self, config: &RepoSourceConfig, path: &str) -> Result<RepoFile> {
        get_file_by_path(&self.repos, config, path).await
    }
}

#[async_trait::async_trait]
impl Loader for RepoLoader {
    #[instrument(skip_all, fields(knowledge_id = %knowledge.knowledge_id))]
    async fn load(&self, knowledge: &Knowledge) -> Result<Vec<Text>> {
        let config = repo_config(knowledge)?;
        let repo = self.repos.checkout(config).await?;

        let root = repo.path.clone();
        let tree = tokio::task::spawn_blocking(move || render_tree(&root))
            .await
            .context("tree rendering task panicked")??;

        let author = match repo.meta.method {
            DownloadMethod::Git => git::git_first_commit_author(&repo.path)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "could not read commit author");
                    None
                }),
            DownloadMethod::Zip => None,
        };

        let mut metadata = Metadata::new();
        metadata.insert("repo_name".into(), Value::String(config.repo_name.clone()));
        metadata.insert(
            "author_name".into(),
            author.as_ref().map_or(Value::Null, |a| Value::String(a.name.clone())),
        );
        metadata.insert(
            "author_email".into(),
            author.as_ref().map_or(Value::Null, |a| Value::String(a.email.clone())),
        );

        Ok(vec![Text::with_metadata(tree, metadata)])
    }

    async fn on_load_finished(&self, knowledge: &Knowledge) -> Result<()> {
        if !self.cleanup_after_load {
            return Ok(());
        }
        let config = repo_config(knowledge)?;
        self.repos.cleanup_repo(config).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RepoFileLoader
// ---------------------------------------------------------------------------

/// Loads one file of a repository.
#[derive(Debug, Clone)]
pub struct RepoFileLoader {
    repos: Arc<RepoManager>,
}

impl RepoFileLoader {
    pub fn new(repos: Arc<RepoManager>) -> Self {
        Self { repos }
    }
}

#[async_trait::async_trait]
impl Loader for RepoFileLoader {
    #[instrument(skip_all, fields(knowledge_id = %knowledge.knowledge_id))]
    async fn load(&self, knowledge: &Knowledge) -> Result<Vec<Text>> {
        let SourceConfig::RepoFile(file_config) = &knowledge.source_config else {
            bail!(
                "knowledge {} has no repository file source config",
                knowledge.knowledge_id
            );
        };
        let file = get_file_by_path(&self.repos, &file_config.repo, &file_config.path).await?;

        let mut metadata = knowledge.metadata.clone();
        metadata.insert("path".into(), Value::String(file.path));
        metadata.insert("sha".into(), Value::String(file.sha));
        metadata.insert("url".into(), Value::String(file.url));
        metadata.insert(
            "encoding".into(),
            serde_json::to_value(file.encoding).unwrap_or(Value::Null),
        );
        Ok(vec![Text::with_metadata(file.content, metadata)])
    }
}
