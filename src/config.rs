use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable that overrides `cache.path`.
pub const REPO_SAVE_PATH_ENV: &str = "RAGKIT_REPO_SAVE_PATH";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub clone: CloneConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Repository cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Root directory for downloaded repositories.  Defaults to
    /// `{tmp}/repo_download`.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Maximum age (hours) of a checkout before it is re-fetched.  `0`
    /// disables reuse of on-disk checkouts.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    /// Semaphore limit for concurrent downloads (clone or archive).
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl_hours: default_ttl_hours(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    std::env::temp_dir().join("repo_download")
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_max_concurrent_downloads() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Clone behaviour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CloneConfig {
    /// `--depth` of the initial shallow clone.
    #[serde(default = "default_initial_depth")]
    pub initial_depth: u32,
    /// Number of commits added per `git fetch --deepen` retry.
    #[serde(default = "default_depth_step")]
    pub depth_step: u32,
    /// Upper bound on deepen-and-retry rounds when a commit is missing.
    #[serde(default = "default_max_fetch_tries")]
    pub max_fetch_tries: u32,
    /// Size limit passed to `--filter=blob:limit=`.
    #[serde(default = "default_blob_filter_limit")]
    pub blob_filter_limit: String,
    /// Clone URL prefix rewrites (`prefix -> replacement`), applied by git
    /// as `url.<replacement>.insteadOf=<prefix>`.  Points clones at a
    /// mirror while keys and reference URLs keep the forge's name.
    #[serde(default)]
    pub url_rewrites: BTreeMap<String, String>,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            initial_depth: default_initial_depth(),
            depth_step: default_depth_step(),
            max_fetch_tries: default_max_fetch_tries(),
            blob_filter_limit: default_blob_filter_limit(),
            url_rewrites: BTreeMap::new(),
        }
    }
}

fn default_initial_depth() -> u32 {
    1
}

fn default_depth_step() -> u32 {
    20
}

fn default_max_fetch_tries() -> u32 {
    5
}

fn default_blob_filter_limit() -> String {
    "5m".to_string()
}

// ---------------------------------------------------------------------------
// Archive download fallback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Download a ZIP archive when no `git` binary is available.
    #[serde(default = "bool_true")]
    pub zip_fallback: bool,
    /// GitHub REST API root used to discover the default branch.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    /// Host serving GitHub archive downloads.
    #[serde(default = "default_codeload_url")]
    pub codeload_url: String,
    /// Request timeout (seconds) for archive downloads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            zip_fallback: true,
            github_api_url: default_github_api_url(),
            codeload_url: default_codeload_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn bool_true() -> bool {
    true
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_codeload_url() -> String {
    "https://codeload.github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Knowledge loaders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoaderConfig {
    /// Remove the cached checkout once a repo knowledge has been loaded.
    #[serde(default)]
    pub cleanup_after_load: bool,
}

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_embedding_api_base")]
    pub api_base: String,
    /// Name of the environment variable that holds the API key.
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    /// Embedding model requested from the API.
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_embedding_api_base(),
            api_key_env: default_embedding_api_key_env(),
            model: default_embedding_model(),
        }
    }
}

fn default_embedding_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
///
/// When `path` is `None` the built-in defaults are used.  The
/// `RAGKIT_REPO_SAVE_PATH` environment variable overrides `cache.path` in
/// both cases.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let path = path.as_ref();
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            parse_config(&contents)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Ok(dir) = std::env::var(REPO_SAVE_PATH_ENV) {
        if !dir.is_empty() {
            config.cache.path = PathBuf::from(dir);
        }
    }

    validate_config(&config)?;
    Ok(config)
}

fn parse_config(contents: &str) -> Result<Config> {
    // An empty document deserialises to `null`, which serde_yaml rejects for
    // a struct.
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.clone.initial_depth >= 1,
        "clone.initial_depth must be at least 1"
    );
    anyhow::ensure!(
        config.clone.depth_step >= 1,
        "clone.depth_step must be at least 1"
    );
    anyhow::ensure!(
        config.cache.max_concurrent_downloads >= 1,
        "cache.max_concurrent_downloads must be at least 1"
    );
    anyhow::ensure!(
        !config.clone.blob_filter_limit.trim().is_empty(),
        "clone.blob_filter_limit must not be empty"
    );
    Ok(())
}
