//! Decomposition of a repository knowledge into one knowledge per file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::git::{self, TreeEntry};
use crate::model::{
    sha256_hex, Knowledge, KnowledgeSource, KnowledgeType, RepoFileSourceConfig, RepoParseConfig,
    RepoSourceConfig, SourceConfig, SplitConfig,
};
use crate::pattern::FilePatternManager;
use crate::registry::Decomposer;
use crate::repo::{DownloadMethod, RepoManager};

use super::repo::{reference_url, resolve_branch};

/// Metadata key of the browser URL attached to every child knowledge.
pub const REFERENCE_URL_KEY: &str = "_reference_url";

#[derive(Debug, Clone)]
pub struct RepoDecomposer {
    repos: Arc<RepoManager>,
}

impl RepoDecomposer {
    pub fn new(repos: Arc<RepoManager>) -> Self {
        Self { repos }
    }
}

#[async_trait::async_trait]
impl Decomposer for RepoDecomposer {
    #[instrument(skip_all, fields(knowledge_id = %knowledge.knowledge_id))]
    async fn decompose(&self, knowledge: &Knowledge) -> Result<Vec<Knowledge>> {
        let config = knowledge.repo_config().with_context(|| {
            format!(
                "knowledge {} has no repository source config",
                knowledge.knowledge_id
            )
        })?;
        let parse_config = match &knowledge.split_config {
            SplitConfig::GithubRepo(parse) => parse.clone(),
            _ => RepoParseConfig::default(),
        };

        let repo = self.repos.checkout(config).await?;
        let branch = resolve_branch(config, &repo).await;

        let patterns = FilePatternManager::new(&parse_config, &repo.path);
        for warning in patterns.validate_patterns() {
            warn!(repo = %config.repo_name, "{warning}");
        }

        let tree = match repo.meta.method {
            DownloadMethod::Git => git::git_ls_tree(&repo.path).await.unwrap_or_else(|e| {
                warn!(error = %e, "git ls-tree failed, hashing file contents instead");
                HashMap::new()
            }),
            DownloadMethod::Zip => HashMap::new(),
        };

        let root = repo.path.clone();
        let files = tokio::task::spawn_blocking(move || select_files(&root, &patterns))
            .await
            .context("repository walk task panicked")?;

        let mut children = Vec::with_capacity(files.len());
        for relative in files {
            match build_child(knowledge, config, &repo.path, &relative, &branch, &tree).await {
                Ok(child) => children.push(child),
                Err(e) => warn!(path = %relative, error = %format!("{e:#}"), "skipping file"),
            }
        }

        info!(
            repo = %config.repo_name,
            branch = %branch,
            files = children.len(),
            "repository decomposed"
        );
        Ok(children)
    }
}

/// Walk the checkout and return the sorted `/`-separated relative paths of
/// every file the pattern manager admits.
fn select_files(root: &Path, patterns: &FilePatternManager) -> Vec<String> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = to_slash(relative);
        if patterns.should_include_file(&relative) {
            files.push(relative);
        }
    }
    files.sort();
    files
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

async fn build_child(
    parent: &Knowledge,
    config: &RepoSourceConfig,
    root: &Path,
    relative: &str,
    branch: &str,
    tree: &HashMap<String, TreeEntry>,
) -> Result<Knowledge> {
    let full_path: PathBuf = root.join(relative);
    let size = tokio::fs::metadata(&full_path)
        .await
        .with_context(|| format!("failed to stat {}", full_path.display()))?
        .len();
    let sha = match tree.get(relative) {
        Some(entry) => entry.sha.clone(),
        None => {
            let bytes = tokio::fs::read(&full_path)
                .await
                .with_context(|| format!("failed to read {}", full_path.display()))?;
            sha256_hex(&bytes)
        }
    };

    let extension = Path::new(relative)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut child = Knowledge::new(
        parent.space_id.clone(),
        parent.tenant_id.clone(),
        format!("{}/{relative}", config.repo_name),
        KnowledgeSource::GithubFile,
        KnowledgeType::from_extension(&extension),
        SourceConfig::RepoFile(RepoFileSourceConfig {
            repo: config.clone(),
            path: relative.to_string(),
        }),
    );
    child.embedding_model_name = parent.embedding_model_name.clone();
    child.split_config = parent.split_config.clone();
    child.parent_id = Some(parent.knowledge_id.clone());
    child.enabled = parent.enabled;
    child.file_sha = Some(sha);
    child.file_size = Some(size);
    child.metadata = parent.metadata.clone();
    child.metadata.insert(
        REFERENCE_URL_KEY.to_string(),
        Value::String(reference_url(config, branch, relative)),
    );
    Ok(child)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::Config;
    use crate::repo::{meta, repo_key, RepoMeta};

    async fn seed_checkout(dir: &Path, config: &RepoSourceConfig, files: &[(&str, &str)]) {
        let key = repo_key(config);
        let path = dir.join(&key);
        for (name, content) in files {
            let file = path.join(name);
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, content).unwrap();
        }
        meta::write_meta(
            dir,
            &RepoMeta {
                key,
                repo_name: config.repo_name.clone(),
                branch: config.branch.clone(),
                commit_id: None,
                path,
                method: DownloadMethod::Zip,
                default_branch: None,
                last_update: Utc::now(),
            },
        )
        .await
        .unwrap();
    }

    fn manager(dir: &Path) -> Arc<RepoManager> {
        let mut config = Config::default();
        config.cache.path = dir.to_path_buf();
        Arc::new(RepoManager::new(&config, reqwest::Client::new()).unwrap())
    }

    fn repo_knowledge(config: RepoSourceConfig, split: SplitConfig) -> Knowledge {
        let mut knowledge = Knowledge::new(
            "space-1",
            "tenant-1",
            config.repo_name.clone(),
            KnowledgeSource::GithubRepo,
            KnowledgeType::GithubRepo,
            SourceConfig::Repo(config),
        );
        knowledge.split_config = split;
        knowledge
            .metadata
            .insert("team".to_string(), Value::String("docs".to_string()));
        knowledge
    }

    #[tokio::test]
    async fn default_config_selects_markdown_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RepoSourceConfig {
            branch: Some("dev".to_string()),
            ..RepoSourceConfig::new("acme/widgets")
        };
        seed_checkout(
            tmp.path(),
            &config,
            &[
                ("README.md", "# Widgets"),
                ("docs/guide.mdx", "guide"),
                ("src/lib.rs", "fn main() {}"),
                ("node_modules/pkg/README.md", "vendored"),
            ],
        )
        .await;

        let parent = repo_knowledge(config, SplitConfig::default());
        let children = RepoDecomposer::new(manager(tmp.path()))
            .decompose(&parent)
            .await
            .unwrap();

        let names: Vec<_> = children.iter().map(|c| c.knowledge_name.as_str()).collect();
        assert_eq!(names, vec!["acme/widgets/README.md", "acme/widgets/docs/guide.mdx"]);

        let readme = &children[0];
        assert_eq!(readme.source_type, KnowledgeSource::GithubFile);
        assert_eq!(readme.knowledge_type, KnowledgeType::Markdown);
        assert_eq!(readme.parent_id.as_deref(), Some(parent.knowledge_id.as_str()));
        assert_eq!(readme.space_id, "space-1");
        assert_eq!(readme.tenant_id, "tenant-1");
        assert_eq!(readme.file_size, Some(9));
        assert_eq!(readme.file_sha.as_deref(), Some(sha256_hex(b"# Widgets").as_str()));
        assert_eq!(
            readme.metadata[REFERENCE_URL_KEY],
            "https://github.com/acme/widgets/blob/dev/README.md"
        );
        assert_eq!(readme.metadata["team"], "docs");
        match &readme.source_config {
            SourceConfig::RepoFile(file) => {
                assert_eq!(file.path, "README.md");
                assert_eq!(file.repo.branch.as_deref(), Some("dev"));
            }
            other => panic!("unexpected source config {other:?}"),
        }
    }

    #[tokio::test]
    async fn explicit_patterns_and_gitignore() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RepoSourceConfig::new("acme/tools");
        seed_checkout(
            tmp.path(),
            &config,
            &[
                (".gitignore", "generated/\n"),
                ("src/main.rs", "fn main() {}"),
                ("src/util.py", "pass"),
                ("generated/out.rs", "// gen"),
                ("tests/skip.rs", "// skip"),
            ],
        )
        .await;

        let split = SplitConfig::GithubRepo(RepoParseConfig {
            include_patterns: vec!["*.rs".to_string(), "*.py".to_string()],
            ignore_patterns: vec!["tests/".to_string()],
            use_gitignore: true,
            use_default_ignore: true,
        });
        let children = RepoDecomposer::new(manager(tmp.path()))
            .decompose(&repo_knowledge(config, split))
            .await
            .unwrap();

        let types: Vec<_> = children
            .iter()
            .map(|c| (c.knowledge_name.as_str(), c.knowledge_type))
            .collect();
        assert_eq!(
            types,
            vec![
                ("acme/tools/src/main.rs", KnowledgeType::Rust),
                ("acme/tools/src/util.py", KnowledgeType::Python),
            ]
        );
        assert_eq!(
            children[0].metadata[REFERENCE_URL_KEY],
            "https://github.com/acme/tools/blob/main/src/main.rs"
        );
    }

    #[tokio::test]
    async fn git_checkout_uses_blob_ids() {
        if !git::git_available().await {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let config = RepoSourceConfig::new("acme/gitrepo");
        let key = repo_key(&config);
        let path = tmp.path().join(&key);
        crate::repo::test_support::init_repo_with_commits(&path, 1);
        meta::write_meta(
            tmp.path(),
            &RepoMeta {
                key,
                repo_name: config.repo_name.clone(),
                branch: None,
                commit_id: None,
                path: path.clone(),
                method: DownloadMethod::Git,
                default_branch: None,
                last_update: Utc::now(),
            },
        )
        .await
        .unwrap();

        let children = RepoDecomposer::new(manager(tmp.path()))
            .decompose(&repo_knowledge(config, SplitConfig::default()))
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        let expected = git::git_rev_parse(&path, "HEAD:file0.md").await.unwrap();
        assert_eq!(children[0].file_sha.as_deref(), Some(expected.as_str()));
        assert_eq!(
            children[0].metadata[REFERENCE_URL_KEY],
            "https://github.com/acme/gitrepo/blob/main/file0.md"
        );
    }
}
