//! Fetching repository contents onto local disk.
//!
//! With a `git` binary available a shallow, blob-filtered clone is made and
//! the history is deepened step by step until a requested commit can be
//! checked out.  Without git, an archive of the requested ref is downloaded
//! over HTTPS and unpacked instead.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};
use zip::ZipArchive;

use crate::config::{CloneConfig, DownloadConfig};
use crate::git::{self, ShallowClone};
use crate::model::RepoSourceConfig;

use super::key::{build_clone_url, checkout_dir, forge_host, is_github};
use super::meta::DownloadMethod;

/// Checkout-failure messages that mean "commit not in the shallow history".
const MISSING_COMMIT_MARKERS: &[&str] = &[
    "did not match any file",
    "reference is not a tree",
    "unknown revision",
    "not found",
    "pathspec",
];

const AUTH_FAILED: &str = "Authentication failed. Please check your token.";
const GIT_MISSING: &str = "Git is not installed in the system";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Repository facts reported by the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub default_branch: String,
}

/// Outcome of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Where the contents ended up.  Differs from the requested
    /// destination when a stale directory could not be removed.
    pub path: PathBuf,
    pub method: DownloadMethod,
    pub default_branch: Option<String>,
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Downloader {
    clone: CloneConfig,
    download: DownloadConfig,
    http: reqwest::Client,
    git_present: OnceCell<bool>,
    /// `key -> RepoInfo` for archive downloads.
    repo_info: Mutex<HashMap<String, RepoInfo>>,
}

impl Downloader {
    pub fn new(clone: CloneConfig, download: DownloadConfig, http: reqwest::Client) -> Self {
        Self {
            clone,
            download,
            http,
            git_present: OnceCell::new(),
            repo_info: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a usable `git` binary is on `PATH`.  Checked once.
    pub async fn git_present(&self) -> bool {
        *self.git_present.get_or_init(git::git_available).await
    }

    /// Fetch `config` into the checkout directory of `key` under
    /// `repos_dir`, replacing whatever is there.
    #[instrument(skip(self, config, repos_dir), fields(repo = %config.repo_name, key = %key))]
    pub async fn fetch(&self, config: &RepoSourceConfig, key: &str, repos_dir: &Path) -> Result<Fetched> {
        let dest = checkout_dir(repos_dir, key)?;
        let dest = prepare_destination(&dest).await?;

        if self.git_present().await {
            self.clone_repo(config, &dest).await?;
            return Ok(Fetched {
                path: dest,
                method: DownloadMethod::Git,
                default_branch: None,
            });
        }

        if !self.download.zip_fallback {
            bail!(GIT_MISSING);
        }

        warn!("git not available, falling back to archive download");
        let default_branch = self.download_zip(config, key, &dest).await?;
        Ok(Fetched {
            path: dest,
            method: DownloadMethod::Zip,
            default_branch,
        })
    }

    // -----------------------------------------------------------------------
    // Git
    // -----------------------------------------------------------------------

    async fn clone_repo(&self, config: &RepoSourceConfig, dest: &Path) -> Result<()> {
        let url = build_clone_url(config)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }

        let rewrites: Vec<String> = self
            .clone
            .url_rewrites
            .iter()
            .map(|(prefix, replacement)| format!("url.{replacement}.insteadOf={prefix}"))
            .collect();
        let opts = ShallowClone {
            branch: config.branch.as_deref().filter(|b| !b.is_empty()),
            depth: self.clone.initial_depth,
            blob_limit: Some(self.clone.blob_filter_limit.as_str()),
            config: &rewrites,
        };
        git::git_clone_shallow(&url, dest, &opts)
            .await
            .map_err(classify_clone_error)?;

        if let Some(commit) = config.commit_id.as_deref().filter(|c| !c.is_empty()) {
            self.checkout_commit(dest, commit, opts.branch).await?;
        }

        info!(path = %dest.display(), "repository cloned");
        Ok(())
    }

    /// Check out `commit`, deepening the shallow history by
    /// `depth_step` commits per round while the commit is missing.
    async fn checkout_commit(&self, dest: &Path, commit: &str, branch: Option<&str>) -> Result<()> {
        let max_tries = self.clone.max_fetch_tries;
        let mut fetches = 0;

        loop {
            let err = match git::git_checkout(dest, commit).await {
                Ok(()) => {
                    debug!(commit, fetches, "commit checked out");
                    return Ok(());
                }
                Err(e) => e,
            };

            if !is_missing_commit(&format!("{err:#}")) {
                return Err(err.context(format!("failed to check out commit {commit}")));
            }
            if fetches >= max_tries {
                bail!("Failed to fetch commit {commit} after {max_tries} incremental fetches.");
            }

            fetches += 1;
            debug!(commit, fetches, depth_step = self.clone.depth_step, "commit missing, deepening history");
            git::git_fetch_deepen(dest, "origin", self.clone.depth_step)
                .await
                .map_err(classify_clone_error)?;
            if let Some(branch) = branch {
                git::git_checkout(dest, branch).await?;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Archive
    // -----------------------------------------------------------------------

    /// Download and unpack an archive of the requested ref.  Returns the
    /// forge's default branch when it had to be looked up.
    async fn download_zip(&self, config: &RepoSourceConfig, key: &str, dest: &Path) -> Result<Option<String>> {
        let explicit_ref = config
            .commit_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(config.branch.as_deref().filter(|b| !b.is_empty()))
            .map(str::to_string);

        let (url, default_branch) = if is_github(config) {
            let (git_ref, default_branch) = match explicit_ref {
                Some(r) => (r, None),
                None => {
                    let info = self.github_repo_info(config, key).await?;
                    (info.default_branch.clone(), Some(info.default_branch))
                }
            };
            (github_archive_url(&self.download.codeload_url, &config.repo_name, &git_ref), default_branch)
        } else {
            let git_ref = explicit_ref.unwrap_or_else(|| "main".to_string());
            (gitlab_archive_url(config, &git_ref)?, None)
        };

        debug!(url = %url, "downloading archive");
        let mut request = self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(self.download.timeout_secs));
        request = with_auth(request, config);
        let response = request
            .send()
            .await
            .with_context(|| format!("archive request to {url} failed"))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            bail!(AUTH_FAILED);
        }
        if !status.is_success() {
            bail!("Failed to download repository archive from {url}: HTTP {status}");
        }
        let bytes = response
            .bytes()
            .await
            .context("failed to read archive body")?
            .to_vec();

        let target = dest.to_path_buf();
        let written = tokio::task::spawn_blocking(move || extract_zip(&bytes, &target))
            .await
            .context("archive extraction task panicked")??;

        info!(path = %dest.display(), files = written, "repository archive extracted");
        Ok(default_branch)
    }

    /// Look up (and cache per key) the repository's name and default branch.
    async fn github_repo_info(&self, config: &RepoSourceConfig, key: &str) -> Result<RepoInfo> {
        if let Some(info) = self.repo_info.lock().await.get(key) {
            return Ok(info.clone());
        }

        let url = format!(
            "{}/repos/{}",
            self.download.github_api_url.trim_end_matches('/'),
            config.repo_name.trim_matches('/')
        );
        let request = with_auth(
            self.http
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/vnd.github+json"),
            config,
        );
        let response = request
            .send()
            .await
            .with_context(|| format!("GitHub API request to {url} failed"))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            bail!(AUTH_FAILED);
        }
        if !status.is_success() {
            bail!("GitHub API returned HTTP {status} for {}", config.repo_name);
        }
        let info: RepoInfo = response
            .json()
            .await
            .context("failed to decode GitHub repository info")?;

        self.repo_info
            .lock()
            .await
            .insert(key.to_string(), info.clone());
        Ok(info)
    }

    /// Cached repository info for `key`, if an archive download looked it up.
    pub async fn cached_repo_info(&self, key: &str) -> Option<RepoInfo> {
        self.repo_info.lock().await.get(key).cloned()
    }

    pub async fn forget_repo_info(&self, key: &str) {
        self.repo_info.lock().await.remove(key);
    }

    #[cfg(test)]
    pub(crate) fn assume_git(&self, present: bool) {
        let _ = self.git_present.set(present);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_missing_commit(message: &str) -> bool {
    MISSING_COMMIT_MARKERS.iter().any(|m| message.contains(m))
}

fn classify_clone_error(err: anyhow::Error) -> anyhow::Error {
    let message = format!("{err:#}");
    if message.contains("Authentication failed") {
        return anyhow!(AUTH_FAILED);
    }
    anyhow!("Failed to clone repository: {message}")
}

fn with_auth(request: reqwest::RequestBuilder, config: &RepoSourceConfig) -> reqwest::RequestBuilder {
    match config.auth_info.as_deref().filter(|a| !a.is_empty()) {
        Some(token) if is_github(config) => {
            request.header(reqwest::header::AUTHORIZATION, format!("token {token}"))
        }
        Some(token) => request.header("PRIVATE-TOKEN", token),
        None => request,
    }
}

/// `{codeload}/{repo}/zip/{ref}`
pub fn github_archive_url(codeload_url: &str, repo_name: &str, git_ref: &str) -> String {
    format!(
        "{}/{}/zip/{}",
        codeload_url.trim_end_matches('/'),
        repo_name.trim_matches('/'),
        git_ref
    )
}

/// `https://{host}/{repo}/-/archive/{ref}/{name}-{ref}.zip`
pub fn gitlab_archive_url(config: &RepoSourceConfig, git_ref: &str) -> Result<String> {
    let host = forge_host(config)?;
    let repo = config.repo_name.trim_matches('/');
    let name = repo.rsplit('/').next().unwrap_or(repo);
    let file_ref = git_ref.replace('/', "-");
    Ok(format!(
        "https://{host}/{repo}/-/archive/{git_ref}/{name}-{file_ref}.zip"
    ))
}

/// Clear `dest` for a fresh download.  When the old directory cannot be
/// removed a timestamp-suffixed sibling is returned instead.
async fn prepare_destination(dest: &Path) -> Result<PathBuf> {
    if !tokio::fs::try_exists(dest).await.unwrap_or(false) {
        return Ok(dest.to_path_buf());
    }

    match tokio::fs::remove_dir_all(dest).await {
        Ok(()) => {
            debug!(path = %dest.display(), "removed stale checkout");
            Ok(dest.to_path_buf())
        }
        Err(e) => {
            let file_name = dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "repo".to_string());
            let fallback = dest.with_file_name(format!(
                "{file_name}_{}",
                chrono::Utc::now().format("%Y%m%d%H%M%S%3f")
            ));
            warn!(
                path = %dest.display(),
                fallback = %fallback.display(),
                error = %e,
                "failed to remove stale checkout, using a new directory"
            );
            Ok(fallback)
        }
    }
}

/// Unpack `bytes` into `dest`, dropping the archive's single top-level
/// directory.  Returns the number of files written.
fn extract_zip(bytes: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("failed to read archive")?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .with_context(|| format!("failed to read archive entry {i}"))?;
        let Some(path) = entry.enclosed_name() else {
            bail!("archive entry escapes the destination: {}", entry.name());
        };
        names.push(path);
    }
    let prefix = common_top_dir(&names);

    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create directory: {}", dest.display()))?;

    let mut written = 0;
    for (i, name) in names.iter().enumerate() {
        let relative = match &prefix {
            Some(prefix) => name.strip_prefix(prefix).unwrap_or(name),
            None => name.as_path(),
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out_path = dest.join(relative);

        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("failed to read archive entry {i}"))?;
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .with_context(|| format!("failed to create directory: {}", out_path.display()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        let mut outfile = std::fs::File::create(&out_path)
            .with_context(|| format!("failed to create file: {}", out_path.display()))?;
        std::io::copy(&mut entry, &mut outfile)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        written += 1;
    }

    Ok(written)
}

/// The first path component shared by every entry, provided at least one
/// entry lies below it.
fn common_top_dir(names: &[PathBuf]) -> Option<PathBuf> {
    let first = match names.first()?.components().next()? {
        Component::Normal(c) => c.to_owned(),
        _ => return None,
    };
    let mut nested = false;
    for name in names {
        let mut components = name.components();
        match components.next() {
            Some(Component::Normal(c)) if c == first.as_os_str() => {}
            _ => return None,
        }
        if components.next().is_some() {
            nested = true;
        }
    }
    nested.then(|| PathBuf::from(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::{zip_bytes as build_zip, StubForge};

    fn archive_downloader(forge: &StubForge) -> Downloader {
        let downloader = Downloader::new(
            CloneConfig::default(),
            DownloadConfig {
                github_api_url: forge.base_url.clone(),
                codeload_url: forge.base_url.clone(),
                ..DownloadConfig::default()
            },
            reqwest::Client::builder().no_proxy().build().unwrap(),
        );
        downloader.assume_git(false);
        downloader
    }

    #[test]
    fn missing_commit_markers() {
        assert!(is_missing_commit(
            "git checkout failed (status 1): error: pathspec 'abc' did not match any file(s) known to git"
        ));
        assert!(is_missing_commit("fatal: reference is not a tree: abc"));
        assert!(!is_missing_commit("error: Your local changes would be overwritten"));
    }

    #[test]
    fn clone_errors_are_classified() {
        let auth = classify_clone_error(anyhow!(
            "git clone failed (status 128): fatal: Authentication failed for 'https://***@github.com/a/b.git/'"
        ));
        assert_eq!(auth.to_string(), AUTH_FAILED);

        let other = classify_clone_error(anyhow!("git clone failed: repository not found"));
        assert!(other.to_string().starts_with("Failed to clone repository: "));
    }

    #[test]
    fn archive_urls() {
        assert_eq!(
            github_archive_url("https://codeload.github.com/", "acme/widgets", "main"),
            "https://codeload.github.com/acme/widgets/zip/main"
        );
        let cfg = RepoSourceConfig {
            url: "https://gitlab.example.com".to_string(),
            ..RepoSourceConfig::new("group/project")
        };
        assert_eq!(
            gitlab_archive_url(&cfg, "release/1.0").unwrap(),
            "https://gitlab.example.com/group/project/-/archive/release/1.0/project-release-1.0.zip"
        );
    }

    #[test]
    fn extract_strips_top_level_directory() {
        let bytes = build_zip(&[
            ("widgets-main/", ""),
            ("widgets-main/README.md", "# Widgets"),
            ("widgets-main/docs/", ""),
            ("widgets-main/docs/guide.md", "guide"),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("out");
        let written = extract_zip(&bytes, &dest).unwrap();
        assert_eq!(written, 2);
        assert_eq!(std::fs::read_to_string(dest.join("README.md")).unwrap(), "# Widgets");
        assert_eq!(std::fs::read_to_string(dest.join("docs/guide.md")).unwrap(), "guide");
        assert!(!dest.join("widgets-main").exists());
    }

    #[test]
    fn extract_keeps_flat_archives() {
        let bytes = build_zip(&[("a.txt", "a"), ("b/c.txt", "c")]);
        let tmp = tempfile::tempdir().unwrap();
        extract_zip(&bytes, tmp.path()).unwrap();
        assert!(tmp.path().join("a.txt").is_file());
        assert!(tmp.path().join("b/c.txt").is_file());
    }

    #[test]
    fn extract_rejects_escaping_entries() {
        let bytes = build_zip(&[("top/ok.txt", "ok"), ("top/../../evil.txt", "x")]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_zip(&bytes, &tmp.path().join("out")).unwrap_err();
        assert!(err.to_string().contains("escapes the destination"));
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn prepare_destination_removes_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("acme_widgets");
        std::fs::create_dir_all(dest.join("sub")).unwrap();
        std::fs::write(dest.join("sub/file"), "x").unwrap();

        let prepared = prepare_destination(&dest).await.unwrap();
        assert_eq!(prepared, dest);
        assert!(!dest.exists());

        let fresh = tmp.path().join("other");
        assert_eq!(prepare_destination(&fresh).await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn prepare_destination_falls_back_to_timestamped_sibling() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("acme_widgets");
        // A plain file cannot be removed as a directory.
        std::fs::write(&dest, "in the way").unwrap();

        let prepared = prepare_destination(&dest).await.unwrap();
        assert_ne!(prepared, dest);
        assert_eq!(prepared.parent(), Some(tmp.path()));
        let name = prepared.file_name().unwrap().to_str().unwrap();
        let suffix = name.strip_prefix("acme_widgets_").unwrap();
        assert_eq!(suffix.len(), 17);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
        assert!(dest.is_file());
    }

    #[tokio::test]
    async fn archive_download_looks_up_default_branch_once() {
        let archive = build_zip(&[("widgets-trunk/", ""), ("widgets-trunk/README.md", "# Widgets")]);
        let forge = StubForge::start(vec![
            (
                "/repos/acme/widgets",
                200,
                br#"{"name":"widgets","default_branch":"trunk"}"#.to_vec(),
            ),
            ("/acme/widgets/zip/trunk", 200, archive),
        ])
        .await;
        let downloader = archive_downloader(&forge);
        let config = RepoSourceConfig {
            auth_info: Some("ghp_token".to_string()),
            ..RepoSourceConfig::new("acme/widgets")
        };
        let tmp = tempfile::tempdir().unwrap();

        for _ in 0..2 {
            let fetched = downloader.fetch(&config, "acme_widgets", tmp.path()).await.unwrap();
            assert_eq!(fetched.path, tmp.path().join("acme_widgets"));
            assert_eq!(fetched.method, DownloadMethod::Zip);
            assert_eq!(fetched.default_branch.as_deref(), Some("trunk"));
            assert_eq!(
                std::fs::read_to_string(fetched.path.join("README.md")).unwrap(),
                "# Widgets"
            );
        }

        assert_eq!(forge.hits("/repos/acme/widgets"), 1);
        assert_eq!(forge.hits("/acme/widgets/zip/trunk"), 2);
        assert_eq!(
            downloader.cached_repo_info("acme_widgets").await.unwrap().default_branch,
            "trunk"
        );
        assert!(forge
            .requests()
            .iter()
            .all(|r| r.header("authorization") == Some("token ghp_token")));

        downloader.forget_repo_info("acme_widgets").await;
        assert!(downloader.cached_repo_info("acme_widgets").await.is_none());
    }

    #[tokio::test]
    async fn archive_download_with_explicit_ref_skips_lookup() {
        let archive = build_zip(&[("widgets-abc123/notes.md", "notes")]);
        let forge = StubForge::start(vec![("/acme/widgets/zip/abc123", 200, archive)]).await;
        let downloader = archive_downloader(&forge);
        let config = RepoSourceConfig {
            branch: Some("dev".to_string()),
            commit_id: Some("abc123".to_string()),
            ..RepoSourceConfig::new("acme/widgets")
        };
        let tmp = tempfile::tempdir().unwrap();

        let fetched = downloader
            .fetch(&config, "acme_widgets_dev_abc123", tmp.path())
            .await
            .unwrap();
        assert_eq!(fetched.default_branch, None);
        assert!(fetched.path.join("notes.md").is_file());
        assert_eq!(forge.hits("/repos/acme/widgets"), 0);
    }

    #[tokio::test]
    async fn archive_auth_failures_are_reported() {
        let forge = StubForge::start(vec![
            ("/repos/acme/private", 403, b"{}".to_vec()),
            ("/acme/widgets/zip/main", 401, Vec::new()),
        ])
        .await;
        let downloader = archive_downloader(&forge);
        let tmp = tempfile::tempdir().unwrap();

        let err = downloader
            .fetch(&RepoSourceConfig::new("acme/private"), "acme_private", tmp.path())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), AUTH_FAILED);

        let config = RepoSourceConfig {
            branch: Some("main".to_string()),
            ..RepoSourceConfig::new("acme/widgets")
        };
        let err = downloader
            .fetch(&config, "acme_widgets_main", tmp.path())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), AUTH_FAILED);
    }

    #[tokio::test]
    async fn fetch_rejects_keys_outside_the_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(tmp.path().join("precious.txt"), "keep").unwrap();

        let downloader = Downloader::new(
            CloneConfig::default(),
            DownloadConfig::default(),
            reqwest::Client::new(),
        );
        for key in ["..", ""] {
            let err = downloader
                .fetch(&RepoSourceConfig::new(key), key, &cache)
                .await
                .unwrap_err();
            assert!(err.to_string().starts_with("invalid repository cache key"));
        }
        assert!(tmp.path().join("precious.txt").is_file());
        assert!(cache.is_dir());
    }

    #[tokio::test]
    async fn git_missing_without_fallback_fails() {
        let downloader = Downloader::new(
            CloneConfig::default(),
            DownloadConfig {
                zip_fallback: false,
                ..DownloadConfig::default()
            },
            reqwest::Client::new(),
        );
        downloader.assume_git(false);

        let tmp = tempfile::tempdir().unwrap();
        let err = downloader
            .fetch(&RepoSourceConfig::new("acme/widgets"), "acme_widgets", tmp.path())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), GIT_MISSING);
    }

    #[tokio::test]
    async fn deepens_until_commit_is_reachable() {
        if !git::git_available().await {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        let commits = crate::repo::test_support::init_repo_with_commits(&origin, 4);

        let downloader = Downloader::new(
            CloneConfig {
                depth_step: 1,
                max_fetch_tries: 5,
                ..CloneConfig::default()
            },
            DownloadConfig::default(),
            reqwest::Client::new(),
        );
        let dest = tmp.path().join("clone");
        let url = format!("file://{}", origin.display());
        git::git_clone_shallow(
            &url,
            &dest,
            &ShallowClone {
                branch: None,
                depth: 1,
                blob_limit: None,
                config: &[],
            },
        )
        .await
        .unwrap();

        downloader.checkout_commit(&dest, &commits[1], None).await.unwrap();
        let head = git::git_rev_parse(&dest, "HEAD").await.unwrap();
        assert_eq!(head, commits[1]);
    }

    #[tokio::test]
    async fn gives_up_after_max_fetch_tries() {
        if !git::git_available().await {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        crate::repo::test_support::init_repo_with_commits(&origin, 2);

        let downloader = Downloader::new(
            CloneConfig {
                depth_step: 1,
                max_fetch_tries: 2,
                ..CloneConfig::default()
            },
            DownloadConfig::default(),
            reqwest::Client::new(),
        );
        let dest = tmp.path().join("clone");
        let url = format!("file://{}", origin.display());
        git::git_clone_shallow(
            &url,
            &dest,
            &ShallowClone {
                branch: None,
                depth: 1,
                blob_limit: None,
                config: &[],
            },
        )
        .await
        .unwrap();

        let missing = "0123456789abcdef0123456789abcdef01234567";
        let err = downloader.checkout_commit(&dest, missing, None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Failed to fetch commit {missing} after 2 incremental fetches.")
        );
    }
}
