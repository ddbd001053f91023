//! Last-update metadata persisted beside each cached checkout.
//!
//! Layout: `{repos_dir}/.meta/{key}.json`.  A checkout whose metadata is
//! missing, unreadable or older than the TTL is treated as expired.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Directory (relative to the repos dir) holding the metadata files.
pub const META_DIR: &str = ".meta";

/// How a checkout was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMethod {
    Git,
    Zip,
}

/// Persisted state of a cached checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMeta {
    pub key: String,
    pub repo_name: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_id: Option<String>,
    pub path: PathBuf,
    pub method: DownloadMethod,
    /// Default branch reported by the forge (archive downloads only).
    #[serde(default)]
    pub default_branch: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl RepoMeta {
    /// Whether this checkout is older than `ttl_hours`.  A TTL of zero
    /// expires everything.
    pub fn is_expired(&self, ttl_hours: u64) -> bool {
        is_stale(self.last_update, ttl_hours, Utc::now())
    }
}

fn is_stale(last_update: DateTime<Utc>, ttl_hours: u64, now: DateTime<Utc>) -> bool {
    if ttl_hours == 0 {
        return true;
    }
    // Clamp to what a millisecond-precision duration can hold.
    const MAX_TTL_HOURS: u64 = (i64::MAX / 3_600_000) as u64;
    let ttl = Duration::hours(ttl_hours.min(MAX_TTL_HOURS) as i64);
    now.signed_duration_since(last_update) > ttl
}

/// Path of the metadata file for `key`.
pub fn meta_path(repos_dir: &Path, key: &str) -> PathBuf {
    repos_dir.join(META_DIR).join(format!("{key}.json"))
}

/// Read the metadata for `key`.  Missing or corrupt files yield `None`.
pub async fn read_meta(repos_dir: &Path, key: &str) -> Option<RepoMeta> {
    let path = meta_path(repos_dir, key);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(_) => return None,
    };
    match serde_json::from_slice(&bytes) {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring unreadable repo metadata");
            None
        }
    }
}

/// Write `meta` atomically (temp file + rename).
pub async fn write_meta(repos_dir: &Path, meta: &RepoMeta) -> Result<()> {
    let path = meta_path(repos_dir, &meta.key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create metadata dir {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(meta).context("serialise repo metadata")?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json)
        .await
        .with_context(|| format!("write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .with_context(|| format!("rename {} → {}", tmp_path.display(), path.display()))?;
    Ok(())
}

/// Remove the metadata for `key`; a missing file is not an error.
pub async fn remove_meta(repos_dir: &Path, key: &str) -> Result<()> {
    let path = meta_path(repos_dir, key);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Every metadata file currently under `repos_dir`.  Unreadable entries
/// are reported with `None` so callers can still clean them up.
pub async fn list_meta(repos_dir: &Path) -> Result<Vec<(String, Option<RepoMeta>)>> {
    let dir = repos_dir.join(META_DIR);
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
            continue;
        };
        let key = key.to_string();
        let meta = read_meta(repos_dir, &key).await;
        out.push((key, meta));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dir: &Path, last_update: DateTime<Utc>) -> RepoMeta {
        RepoMeta {
            key: "acme_widgets".to_string(),
            repo_name: "acme/widgets".to_string(),
            branch: None,
            commit_id: None,
            path: dir.join("acme_widgets"),
            method: DownloadMethod::Git,
            default_branch: None,
            last_update,
        }
    }

    #[test]
    fn staleness() {
        let now = Utc::now();
        assert!(!is_stale(now - Duration::hours(1), 24, now));
        assert!(is_stale(now - Duration::hours(25), 24, now));
        assert!(is_stale(now, 0, now));
        assert!(!is_stale(now - Duration::days(10_000), u64::MAX, now));
    }

    #[tokio::test]
    async fn write_read_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let meta = sample(tmp.path(), Utc::now());

        assert!(read_meta(tmp.path(), "acme_widgets").await.is_none());
        write_meta(tmp.path(), &meta).await.unwrap();
        assert_eq!(read_meta(tmp.path(), "acme_widgets").await, Some(meta.clone()));
        assert!(!meta.is_expired(24));

        let listed = list_meta(tmp.path()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "acme_widgets");

        remove_meta(tmp.path(), "acme_widgets").await.unwrap();
        remove_meta(tmp.path(), "acme_widgets").await.unwrap();
        assert!(read_meta(tmp.path(), "acme_widgets").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_metadata_reads_as_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = meta_path(tmp.path(), "broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_meta(tmp.path(), "broken").await.is_none());

        let listed = list_meta(tmp.path()).await.unwrap();
        assert_eq!(listed, vec![("broken".to_string(), None)]);
    }

    #[test]
    fn method_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&DownloadMethod::Zip).unwrap(), "\"zip\"");
    }
}
