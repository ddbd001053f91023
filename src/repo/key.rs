//! Cache keys and clone URLs for repository sources.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};

use crate::model::RepoSourceConfig;

use super::meta::META_DIR;

/// Derive the cache key of a repository source.
///
/// The key is `repo_name`, then `branch` and `commit_id` when present,
/// joined with `_`, with every `/` replaced by `_`:
///
/// - `acme/widgets` → `acme_widgets`
/// - `acme/widgets` @ `feature/x` → `acme_widgets_feature_x`
pub fn repo_key(config: &RepoSourceConfig) -> String {
    let mut parts = vec![config.repo_name.as_str()];
    if let Some(branch) = config.branch.as_deref().filter(|b| !b.is_empty()) {
        parts.push(branch);
    }
    if let Some(commit) = config.commit_id.as_deref().filter(|c| !c.is_empty()) {
        parts.push(commit);
    }
    parts.join("_").replace('/', "_")
}

/// Checkout directory of `key` directly under `repos_dir`.
///
/// The key must be a single plain path component other than the metadata
/// directory; empty, `.` and `..` keys are rejected.
pub fn checkout_dir(repos_dir: &Path, key: &str) -> Result<PathBuf> {
    let mut components = Path::new(key).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || key == META_DIR {
        bail!("invalid repository cache key: '{key}'");
    }
    Ok(repos_dir.join(key))
}

/// Host part of the config's base URL, i.e. the URL with any scheme and
/// trailing slash removed.
pub fn forge_host(config: &RepoSourceConfig) -> Result<&str> {
    let base = config.base_url();
    let host = match base.split_once("://") {
        Some(("https", rest)) => rest,
        Some((scheme, _)) => bail!("unsupported URL scheme '{scheme}' in {base}: only https is allowed"),
        None => base,
    };
    if host.is_empty() {
        bail!("repository URL has no host: '{}'", config.url);
    }
    Ok(host)
}

/// Build the HTTPS clone URL, embedding `auth_info` as userinfo when set.
///
/// The result contains credentials: pass it through
/// [`redact_url`](crate::git::redact_url) before logging.
pub fn build_clone_url(config: &RepoSourceConfig) -> Result<String> {
    if config.repo_name.trim().is_empty() {
        bail!("repository name must not be empty");
    }
    let host = forge_host(config)?;
    let repo = config.repo_name.trim_matches('/');
    Ok(match config.auth_info.as_deref().filter(|a| !a.is_empty()) {
        Some(auth) => format!("https://{auth}@{host}/{repo}.git"),
        None => format!("https://{host}/{repo}.git"),
    })
}

/// Whether the forge is GitHub (archive downloads go through codeload).
pub fn is_github(config: &RepoSourceConfig) -> bool {
    forge_host(config)
        .map(|host| host == "github.com" || host == "www.github.com")
        .unwrap_or(false)
}
