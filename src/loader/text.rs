use anyhow::{bail, Result};

use crate::model::{Knowledge, SourceConfig, Text};
use crate::registry::Loader;

/// Loads user-entered text verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

#[async_trait::async_trait]
impl Loader for TextLoader {
    async fn load(&self, knowledge: &Knowledge) -> Result<Vec<Text>> {
        let SourceConfig::Text(source) = &knowledge.source_config else {
            bail!("knowledge {} has no text source config", knowledge.knowledge_id);
        };
        Ok(vec![Text::with_metadata(
            source.text.clone(),
            knowledge.metadata.clone(),
        )])
    }
}
