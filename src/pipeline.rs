//! Knowledge ingestion: decompose, load, parse and embed.

use std::sync::Arc;

use anyhow::{ensure, Result};
use tracing::{info, instrument, warn};

use crate::model::{Chunk, Knowledge};
use crate::registry::{Loader, Registry};

/// Drives knowledge items through the registered components.
#[derive(Debug, Clone)]
pub struct Ingestor {
    registry: Arc<Registry>,
    embed: bool,
}

impl Ingestor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            embed: true,
        }
    }

    /// Skip the embedding stage; chunks are returned without vectors.
    pub fn without_embedding(mut self) -> Self {
        self.embed = false;
        self
    }

    /// Child knowledge items of a composite knowledge.
    pub async fn decompose(&self, knowledge: &Knowledge) -> Result<Vec<Knowledge>> {
        let decomposer = self
            .registry
            .get_decomposer(knowledge.knowledge_type.as_str())?;
        decomposer.decompose(knowledge).await
    }

    /// Ingest `knowledge` into chunks.
    ///
    /// Composite knowledge (one with a registered decomposer) is split into
    /// children first; a child that fails is logged and skipped.
    #[instrument(skip_all, fields(knowledge_id = %knowledge.knowledge_id, name = %knowledge.knowledge_name))]
    pub async fn ingest(&self, knowledge: &Knowledge) -> Result<Vec<Chunk>> {
        if !self
            .registry
            .has_decomposer(knowledge.knowledge_type.as_str())
        {
            return self.ingest_leaf(knowledge).await;
        }

        let children = self.decompose(knowledge).await;
        let result = match children {
            Ok(children) => {
                let mut chunks = Vec::new();
                let mut failed = 0usize;
                for child in &children {
                    match self.ingest_leaf(child).await {
                        Ok(c) => chunks.extend(c),
                        Err(e) => {
                            failed += 1;
                            warn!(child = %child.knowledge_name, error = %format!("{e:#}"), "child ingestion failed");
                        }
                    }
                }
                info!(children = children.len(), failed, chunks = chunks.len(), "composite knowledge ingested");
                Ok(chunks)
            }
            Err(e) => Err(e),
        };

        if let Ok(loader) = self.registry.get_loader(knowledge.source_type.as_str()) {
            finish(loader.as_ref(), knowledge).await;
        }
        result
    }

    async fn ingest_leaf(&self, knowledge: &Knowledge) -> Result<Vec<Chunk>> {
        let loader = self.registry.get_loader(knowledge.source_type.as_str())?;
        let result = self.load_parse_embed(loader.as_ref(), knowledge).await;
        finish(loader.as_ref(), knowledge).await;
        result
    }

    async fn load_parse_embed(&self, loader: &dyn Loader, knowledge: &Knowledge) -> Result<Vec<Chunk>> {
        let texts = loader.load(knowledge).await?;

        let parser = self.registry.get_parser(knowledge.knowledge_type.as_str())?;
        let mut pieces = Vec::new();
        for text in texts {
            pieces.extend(parser.parse(knowledge, text).await?);
        }

        let mut chunks: Vec<Chunk> = pieces
            .iter()
            .map(|text| Chunk::for_knowledge(knowledge, text))
            .collect();

        if self.embed && !chunks.is_empty() {
            let embedding = self
                .registry
                .get_embedding(&knowledge.embedding_model_name)?;
            let contents: Vec<String> = pieces.into_iter().map(|t| t.content).collect();
            let vectors = embedding.embed_documents(&contents).await?;
            ensure!(
                vectors.len() == chunks.len(),
                "embedding returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
            for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                chunk.embedding = Some(vector);
            }
        }

        Ok(chunks)
    }
}

async fn finish(loader: &dyn Loader, knowledge: &Knowledge) {
    if let Err(e) = loader.on_load_finished(knowledge).await {
        warn!(knowledge_id = %knowledge.knowledge_id, error = %e, "on_load_finished failed");
    }
}
