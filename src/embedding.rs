//! OpenAI-compatible embedding client.

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::EmbeddingConfig;
use crate::registry::Embedding;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Calls `POST {api_base}/embeddings`.
#[derive(Clone)]
pub struct OpenAiEmbedding {
    http: reqwest::Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedding")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl OpenAiEmbedding {
    /// Build from config, reading the API key from the environment variable
    /// named by `api_key_env`.
    pub fn from_config(config: &EmbeddingConfig, http: reqwest::Client) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl Embedding for OpenAiEmbedding {
    #[instrument(skip_all, fields(model = %self.model, count = texts.len()))]
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("embedding API key is not configured");
        };

        let url = format!("{}/embeddings", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .with_context(|| format!("embedding request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("embedding API returned HTTP {status}: {}", body.trim());
        }
        let body: EmbeddingResponse = response
            .json()
            .await
            .context("failed to decode embedding response")?;
        let vectors = order_embeddings(body, texts.len())?;
        debug!("embeddings received");
        Ok(vectors)
    }

    async fn health_check(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Vectors in input order; the API may return them in any order.
fn order_embeddings(mut body: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    ensure!(
        body.data.len() == expected,
        "embedding API returned {} vectors for {expected} inputs",
        body.data.len()
    );
    body.data.sort_by_key(|d| d.index);
    Ok(body.data.into_iter().map(|d| d.embedding).collect())
}
