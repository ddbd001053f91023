//! Repository cache: keys, downloads, TTL metadata and cleanup.

pub mod downloader;
pub mod key;
pub mod manager;
pub mod meta;

pub use downloader::{Downloader, Fetched, RepoInfo};
pub use key::{build_clone_url, checkout_dir, repo_key};
pub use manager::{CachedRepo, RepoManager};
pub use meta::{DownloadMethod, RepoMeta};
