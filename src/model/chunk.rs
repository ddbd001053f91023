use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Knowledge, Metadata};

/// A piece of loaded content plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Text {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// A split, embedded fragment of a knowledge item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub context: String,
    pub knowledge_id: String,
    pub embedding_model_name: String,
    pub space_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Build an un-embedded chunk of `knowledge`.
    pub fn for_knowledge(knowledge: &Knowledge, text: &Text) -> Self {
        Self {
            chunk_id: uuid::Uuid::new_v4().to_string(),
            embedding: None,
            context: text.content.clone(),
            knowledge_id: knowledge.knowledge_id.clone(),
            embedding_model_name: knowledge.embedding_model_name.clone(),
            space_id: knowledge.space_id.clone(),
            metadata: text.metadata.clone(),
            created_at: Utc::now(),
        }
    }
}

/// A chunk returned by a retriever together with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub similarity: f32,
}
