//! On-disk repository checkout cache with TTL-based invalidation.
//!
//! Checkouts live under `{repos_dir}/{key}` where `key` is derived from repo
//! name, branch and commit (see [`repo_key`]).  An in-memory table maps keys
//! to checkouts; every lookup is re-validated against the filesystem and the
//! persisted last-update metadata, so the table survives neither stale
//! directories nor process restarts incorrectly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::model::RepoSourceConfig;

use super::downloader::Downloader;
use super::key::{checkout_dir, repo_key};
use super::meta::{self, RepoMeta};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A checkout that is present on disk and within its TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRepo {
    pub path: PathBuf,
    pub meta: RepoMeta,
}

// ---------------------------------------------------------------------------
// RepoManager
// ---------------------------------------------------------------------------

/// Owns the checkout cache.  Shared behind an `Arc` by every loader.
#[derive(Debug)]
pub struct RepoManager {
    repos_dir: PathBuf,
    ttl_hours: u64,
    downloader: Downloader,
    table: Mutex<HashMap<String, RepoMeta>>,
    /// Serialises work on the same key so a repo is fetched once.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Bounds concurrent clones and archive downloads.
    downloads: Semaphore,
}

impl RepoManager {
    /// Create a manager rooted at `config.cache.path`, creating the
    /// directory if needed.
    pub fn new(config: &Config, http: reqwest::Client) -> Result<Self> {
        let repos_dir = config.cache.path.clone();
        std::fs::create_dir_all(&repos_dir).with_context(|| {
            format!("failed to create repository cache directory: {}", repos_dir.display())
        })?;

        Ok(Self {
            repos_dir,
            ttl_hours: config.cache.ttl_hours,
            downloader: Downloader::new(config.clone.clone(), config.download.clone(), http),
            table: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            downloads: Semaphore::new(config.cache.max_concurrent_downloads),
        })
    }

    pub fn repos_dir(&self) -> &Path {
        &self.repos_dir
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Local path of the checkout for `config`, fetching it when it is
    /// missing or expired.
    pub async fn get_repo_path(&self, config: &RepoSourceConfig) -> Result<PathBuf> {
        Ok(self.checkout(config).await?.path)
    }

    /// Return a valid checkout for `config`, fetching it when needed.
    #[instrument(skip(self, config), fields(repo = %config.repo_name))]
    pub async fn checkout(&self, config: &RepoSourceConfig) -> Result<CachedRepo> {
        let key = repo_key(config);
        checkout_dir(&self.repos_dir, &key)?;
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        if let Some(hit) = self.lookup(&key).await {
            debug!(key = %key, path = %hit.path.display(), "repository cache hit");
            return Ok(hit);
        }

        let _permit = self
            .downloads
            .acquire()
            .await
            .context("download semaphore closed")?;

        let previous = meta::read_meta(&self.repos_dir, &key).await;
        let fetched = self.downloader.fetch(config, &key, &self.repos_dir).await?;
        if let Some(previous) = previous.filter(|p| p.path != fetched.path) {
            self.remove_checkout(&key, &previous.path).await;
        }

        let meta = RepoMeta {
            key: key.clone(),
            repo_name: config.repo_name.clone(),
            branch: config.branch.clone(),
            commit_id: config.commit_id.clone(),
            path: fetched.path.clone(),
            method: fetched.method,
            default_branch: fetched.default_branch,
            last_update: Utc::now(),
        };
        meta::write_meta(&self.repos_dir, &meta).await?;
        self.table.lock().await.insert(key.clone(), meta.clone());

        info!(key = %key, path = %meta.path.display(), method = ?meta.method, "repository cached");
        Ok(CachedRepo {
            path: fetched.path,
            meta,
        })
    }

    /// Valid cached checkout for `config` without fetching anything.
    pub async fn cached(&self, config: &RepoSourceConfig) -> Option<CachedRepo> {
        let key = repo_key(config);
        checkout_dir(&self.repos_dir, &key).ok()?;
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;
        self.lookup(&key).await
    }

    /// Table lookup validated against disk; falls back to adopting a fresh
    /// checkout left by an earlier process.
    async fn lookup(&self, key: &str) -> Option<CachedRepo> {
        let mut table = self.table.lock().await;

        if let Some(entry) = table.get(key) {
            if entry.path.is_dir() && !entry.is_expired(self.ttl_hours) {
                return Some(CachedRepo {
                    path: entry.path.clone(),
                    meta: entry.clone(),
                });
            }
            debug!(key, "dropping invalid cache entry");
            table.remove(key);
        }

        let persisted = meta::read_meta(&self.repos_dir, key).await?;
        if persisted.is_expired(self.ttl_hours)
            || !self.owns(&persisted.path)
            || !persisted.path.is_dir()
        {
            return None;
        }
        debug!(key, path = %persisted.path.display(), "adopting on-disk checkout");
        table.insert(key.to_string(), persisted.clone());
        Some(CachedRepo {
            path: persisted.path.clone(),
            meta: persisted,
        })
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Remove the checkout and metadata of `config`.  Removal errors are
    /// logged; the cache entry is dropped regardless.  Returns `true` when
    /// a directory was removed.
    #[instrument(skip(self, config), fields(repo = %config.repo_name))]
    pub async fn cleanup_repo(&self, config: &RepoSourceConfig) -> bool {
        let key = repo_key(config);
        self.cleanup_key(&key).await
    }

    async fn cleanup_key(&self, key: &str) -> bool {
        let dir = match checkout_dir(&self.repos_dir, key) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(key, error = %e, "skipping cleanup");
                return false;
            }
        };
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let mut paths = vec![dir];
        if let Some(entry) = self.table.lock().await.remove(key) {
            paths.push(entry.path);
        }
        if let Some(persisted) = meta::read_meta(&self.repos_dir, key).await {
            paths.push(persisted.path);
        }
        paths.sort();
        paths.dedup();

        let mut removed = false;
        for path in &paths {
            removed |= self.remove_checkout(key, path).await;
        }

        if let Err(e) = meta::remove_meta(&self.repos_dir, key).await {
            warn!(key, error = %e, "failed to remove repository metadata");
        }
        self.downloader.forget_repo_info(key).await;
        removed
    }

    /// Whether `path` is a checkout directory slot directly under the cache
    /// directory.
    fn owns(&self, path: &Path) -> bool {
        path.parent() == Some(self.repos_dir.as_path())
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| checkout_dir(&self.repos_dir, name).is_ok())
    }

    /// Remove a checkout directory owned by the cache.
    async fn remove_checkout(&self, key: &str, path: &Path) -> bool {
        if !self.owns(path) {
            warn!(key, path = %path.display(), "refusing to remove path outside the cache");
            return false;
        }
        if !path.is_dir() {
            return false;
        }
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(key, path = %path.display(), "removed cached checkout");
                true
            }
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "failed to remove cached checkout");
                false
            }
        }
    }

    /// Remove every checkout whose metadata is missing, unreadable or
    /// expired.  Returns the number of cache entries removed.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let mut expired = Vec::new();
        for (key, persisted) in meta::list_meta(&self.repos_dir).await? {
            match persisted {
                Some(m) if !m.is_expired(self.ttl_hours) && m.path.is_dir() => {}
                _ => expired.push(key),
            }
        }

        let in_memory: Vec<String> = self.table.lock().await.keys().cloned().collect();
        for key in in_memory {
            if !expired.contains(&key) && meta::read_meta(&self.repos_dir, &key).await.is_none() {
                expired.push(key);
            }
        }

        for key in &expired {
            self.cleanup_key(key).await;
        }
        info!(removed = expired.len(), "expired checkout sweep finished");
        Ok(expired.len())
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Metadata of every checkout recorded on disk, valid or not.
    pub async fn list_repos(&self) -> Result<Vec<RepoMeta>> {
        let mut repos: Vec<RepoMeta> = meta::list_meta(&self.repos_dir)
            .await?
            .into_iter()
            .filter_map(|(_, m)| m)
            .collect();
        repos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(repos)
    }

    /// Total size of everything under the cache directory, in bytes.
    pub fn total_size_bytes(&self) -> Result<u64> {
        dir_size(&self.repos_dir)
    }

    pub fn ttl_hours(&self) -> u64 {
        self.ttl_hours
    }

    /// Per-key lock.  Entries nobody holds are pruned on the way.
    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Recursively compute the total size of all files under `dir`.
pub(crate) fn dir_size(dir: &Path) -> Result<u64> {
    let mut total: u64 = 0;

    if !dir.exists() {
        return Ok(0);
    }

    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::repo::meta::DownloadMethod;
    use crate::repo::test_support::{init_repo_with_commits, zip_bytes, StubForge};

    fn manager(dir: &Path, ttl_hours: u64) -> RepoManager {
        let mut config = Config::default();
        config.cache.path = dir.to_path_buf();
        config.cache.ttl_hours = ttl_hours;
        RepoManager::new(&config, reqwest::Client::new()).unwrap()
    }

    /// Lay down a checkout directory plus metadata as a previous run would.
    async fn seed(dir: &Path, repo: &RepoSourceConfig, age: Duration) -> RepoMeta {
        let key = repo_key(repo);
        let path = dir.join(&key);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("README.md"), "# hi").unwrap();
        let m = RepoMeta {
            key,
            repo_name: repo.repo_name.clone(),
            branch: repo.branch.clone(),
            commit_id: repo.commit_id.clone(),
            path,
            method: DownloadMethod::Git,
            default_branch: None,
            last_update: Utc::now() - age,
        };
        meta::write_meta(dir, &m).await.unwrap();
        m
    }

    #[tokio::test]
    async fn adopts_fresh_checkout_without_fetching() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = RepoSourceConfig::new("acme/widgets");
        let seeded = seed(tmp.path(), &repo, Duration::hours(1)).await;

        let mgr = manager(tmp.path(), 24);
        let hit = mgr.checkout(&repo).await.unwrap();
        assert_eq!(hit.path, seeded.path);
        assert_eq!(mgr.get_repo_path(&repo).await.unwrap(), seeded.path);
    }

    #[tokio::test]
    async fn expired_or_missing_metadata_is_not_a_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let stale = RepoSourceConfig::new("acme/stale");
        seed(tmp.path(), &stale, Duration::hours(48)).await;

        let orphan = RepoSourceConfig::new("acme/orphan");
        std::fs::create_dir_all(tmp.path().join(repo_key(&orphan))).unwrap();

        let mgr = manager(tmp.path(), 24);
        assert!(mgr.cached(&stale).await.is_none());
        assert!(mgr.cached(&orphan).await.is_none());
    }

    #[tokio::test]
    async fn zero_ttl_disables_reuse() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = RepoSourceConfig::new("acme/widgets");
        seed(tmp.path(), &repo, Duration::zero()).await;
        let mgr = manager(tmp.path(), 0);
        assert!(mgr.cached(&repo).await.is_none());
    }

    #[tokio::test]
    async fn dangling_entry_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = RepoSourceConfig::new("acme/widgets");
        let seeded = seed(tmp.path(), &repo, Duration::hours(1)).await;

        let mgr = manager(tmp.path(), 24);
        assert!(mgr.cached(&repo).await.is_some());

        std::fs::remove_dir_all(&seeded.path).unwrap();
        assert!(mgr.cached(&repo).await.is_none());
        assert!(mgr.table.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cleanup_repo_removes_directory_and_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = RepoSourceConfig {
            branch: Some("dev".to_string()),
            ..RepoSourceConfig::new("acme/widgets")
        };
        let seeded = seed(tmp.path(), &repo, Duration::hours(1)).await;

        let mgr = manager(tmp.path(), 24);
        assert!(mgr.cached(&repo).await.is_some());
        assert!(mgr.cleanup_repo(&repo).await);

        assert!(!seeded.path.exists());
        assert!(meta::read_meta(tmp.path(), &seeded.key).await.is_none());
        assert!(mgr.cached(&repo).await.is_none());
        assert!(!mgr.cleanup_repo(&repo).await);
    }

    #[tokio::test]
    async fn cleanup_expired_keeps_fresh_checkouts() {
        let tmp = tempfile::tempdir().unwrap();
        let fresh = RepoSourceConfig::new("acme/fresh");
        let stale = RepoSourceConfig::new("acme/stale");
        let fresh_meta = seed(tmp.path(), &fresh, Duration::hours(1)).await;
        let stale_meta = seed(tmp.path(), &stale, Duration::hours(30)).await;

        let mgr = manager(tmp.path(), 24);
        assert_eq!(mgr.cleanup_expired().await.unwrap(), 1);
        assert!(fresh_meta.path.exists());
        assert!(!stale_meta.path.exists());

        let listed = mgr.list_repos().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "acme_fresh");
    }

    #[tokio::test]
    async fn cleanup_never_leaves_the_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("cache");
        std::fs::write(tmp.path().join("precious.txt"), "keep").unwrap();
        let fresh = RepoSourceConfig::new("acme/widgets");
        let mgr = manager(&cache, 24);
        seed(&cache, &fresh, Duration::hours(1)).await;

        assert!(!mgr.cleanup_repo(&RepoSourceConfig::new("..")).await);
        assert!(!mgr.cleanup_repo(&RepoSourceConfig::new("")).await);
        assert!(!mgr.cleanup_repo(&RepoSourceConfig::new(".meta")).await);

        assert!(tmp.path().join("precious.txt").is_file());
        assert!(cache.join(".meta").is_dir());
        assert!(mgr.cached(&fresh).await.is_some());

        let err = mgr.checkout(&RepoSourceConfig::new("..")).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid repository cache key: '..'");
        assert!(tmp.path().join("precious.txt").is_file());
    }

    #[tokio::test]
    async fn metadata_pointing_outside_the_cache_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("cache");
        let outside = tmp.path().join("elsewhere");
        std::fs::create_dir_all(&outside).unwrap();
        let repo = RepoSourceConfig::new("acme/widgets");
        let mut m = seed(&cache, &repo, Duration::hours(1)).await;
        m.path = outside.clone();
        meta::write_meta(&cache, &m).await.unwrap();

        let mgr = manager(&cache, 24);
        assert!(mgr.cached(&repo).await.is_none());
        mgr.cleanup_repo(&repo).await;
        assert!(outside.is_dir());
    }

    fn archive_manager(dir: &Path, forge: &StubForge) -> RepoManager {
        let mut config = Config::default();
        config.cache.path = dir.to_path_buf();
        config.download.github_api_url = forge.base_url.clone();
        config.download.codeload_url = forge.base_url.clone();
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let mgr = RepoManager::new(&config, http).unwrap();
        mgr.downloader().assume_git(false);
        mgr
    }

    async fn widgets_forge() -> StubForge {
        StubForge::start(vec![(
            "/acme/widgets/zip/main",
            200,
            zip_bytes(&[("widgets-main/README.md", "# Widgets")]),
        )])
        .await
    }

    fn widgets_main() -> RepoSourceConfig {
        RepoSourceConfig {
            branch: Some("main".to_string()),
            ..RepoSourceConfig::new("acme/widgets")
        }
    }

    #[tokio::test]
    async fn concurrent_checkouts_of_one_key_fetch_once() {
        let tmp = tempfile::tempdir().unwrap();
        let forge = widgets_forge().await;
        let mgr = archive_manager(tmp.path(), &forge);
        let repo = widgets_main();

        let (a, b) = tokio::join!(mgr.checkout(&repo), mgr.checkout(&repo));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.path, b.path);
        assert_eq!(a.meta.method, DownloadMethod::Zip);
        assert_eq!(forge.hits("/acme/widgets/zip/main"), 1);
        assert!(a.path.join("README.md").is_file());
        assert_eq!(meta::read_meta(tmp.path(), "acme_widgets_main").await.unwrap(), a.meta);
    }

    #[tokio::test]
    async fn refetch_removes_previous_fallback_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let forge = widgets_forge().await;
        let repo = widgets_main();

        let mut stale = seed(tmp.path(), &repo, Duration::hours(48)).await;
        let sibling = tmp.path().join("acme_widgets_main_20240101000000000");
        std::fs::create_dir_all(&sibling).unwrap();
        stale.path = sibling.clone();
        meta::write_meta(tmp.path(), &stale).await.unwrap();

        let mgr = archive_manager(tmp.path(), &forge);
        let fresh = mgr.checkout(&repo).await.unwrap();
        assert_eq!(fresh.path, tmp.path().join("acme_widgets_main"));
        assert!(!sibling.exists());
    }

    #[tokio::test]
    async fn unused_key_locks_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path(), 24);
        for name in ["acme/a", "acme/b", "acme/c"] {
            assert!(mgr.cached(&RepoSourceConfig::new(name)).await.is_none());
        }
        let locks = mgr.key_locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("acme_c"));
    }

    #[tokio::test]
    async fn checkout_clones_and_deepens_to_commit() {
        if !crate::git::git_available().await {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let forge_root = tmp.path().join("forge");
        let commits = init_repo_with_commits(&forge_root.join("acme/widgets.git"), 4);

        let mut config = Config::default();
        config.cache.path = tmp.path().join("cache");
        config.clone.depth_step = 1;
        config.clone.url_rewrites.insert(
            "https://forge.test/".to_string(),
            format!("file://{}/", forge_root.display()),
        );
        let mgr = RepoManager::new(&config, reqwest::Client::new()).unwrap();

        let repo = RepoSourceConfig {
            url: "https://forge.test".to_string(),
            commit_id: Some(commits[1].clone()),
            ..RepoSourceConfig::new("acme/widgets")
        };
        let cached = mgr.checkout(&repo).await.unwrap();
        assert_eq!(cached.meta.method, DownloadMethod::Git);
        assert_eq!(cached.path, config.cache.path.join(format!("acme_widgets_{}", commits[1])));
        assert_eq!(
            crate::git::git_rev_parse(&cached.path, "HEAD").await.unwrap(),
            commits[1]
        );
        assert!(cached.path.join("file1.md").is_file());
        assert!(!cached.path.join("file2.md").exists());

        let again = mgr.checkout(&repo).await.unwrap();
        assert_eq!(again, cached);
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        std::fs::write(tmp.path().join("a/one"), [0u8; 10]).unwrap();
        std::fs::write(tmp.path().join("a/b/two"), [0u8; 5]).unwrap();
        assert_eq!(dir_size(tmp.path()).unwrap(), 15);
        assert_eq!(dir_size(&tmp.path().join("missing")).unwrap(), 0);
    }
}
