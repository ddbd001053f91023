//! Data types moved through the ingestion pipeline.

pub mod chunk;
pub mod knowledge;

pub use chunk::{Chunk, RetrievalChunk, Text};
pub use knowledge::{
    sha256_hex, Knowledge, KnowledgeSource, KnowledgeType, RepoFileSourceConfig, RepoParseConfig,
    RepoSourceConfig, SourceConfig, SplitConfig, TextSourceConfig, TextSplitConfig,
    OPENAI_EMBEDDING,
};

/// Free-form JSON metadata attached to knowledge, texts and chunks.
pub type Metadata = serde_json::Map<String, serde_json::Value>;
