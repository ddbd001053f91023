use anyhow::Result;

use crate::model::{Chunk, RetrievalChunk};
use crate::registry::Retriever;

/// Case-insensitive substring match; every hit scores 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleRetriever;

impl SimpleRetriever {
    pub const NAME: &'static str = "simple";
}

#[async_trait::async_trait]
impl Retriever for SimpleRetriever {
    async fn retrieve(&self, query: &str, chunks: &[Chunk], top_k: usize) -> Result<Vec<RetrievalChunk>> {
        let needle = query.to_lowercase();
        Ok(chunks
            .iter()
            .filter(|chunk| chunk.context.to_lowercase().contains(&needle))
            .take(top_k)
            .map(|chunk| RetrievalChunk {
                chunk: chunk.clone(),
                similarity: 1.0,
            })
            .collect())
    }
}
