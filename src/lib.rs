//! Knowledge ingestion toolkit for retrieval-augmented generation.
//!
//! Knowledge items are routed through pluggable components held in a
//! [`registry::Registry`]: a decomposer splits composite knowledge (a Git
//! repository) into per-file children, loaders produce raw text, parsers
//! split it and an embedding model turns the pieces into vectors.
//! Repositories are fetched into a TTL-validated on-disk cache managed by
//! [`repo::RepoManager`].

pub mod config;
pub mod embedding;
pub mod git;
pub mod loader;
pub mod model;
pub mod parser;
pub mod pattern;
pub mod pipeline;
pub mod registry;
pub mod repo;
pub mod retriever;

pub use config::{load_config, Config};
pub use pipeline::Ingestor;
pub use registry::{PluginContext, Registry};
