//! Plugin registry.
//!
//! Every pipeline stage is a trait object registered under a string key:
//! loaders by knowledge source, decomposers and parsers by knowledge type,
//! embeddings by model name and retrievers by name.  Callers dispatch
//! through [`Registry`] so that no stage depends on a concrete
//! implementation of another.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::OpenAiEmbedding;
use crate::loader::{RepoDecomposer, RepoFileLoader, RepoLoader, TextLoader};
use crate::model::{Chunk, Knowledge, KnowledgeSource, KnowledgeType, RetrievalChunk, Text, OPENAI_EMBEDDING};
use crate::parser::{TextParser, TEXT_PARSER_TYPES};
use crate::repo::RepoManager;
use crate::retriever::SimpleRetriever;

// ---------------------------------------------------------------------------
// Component traits
// ---------------------------------------------------------------------------

/// Turns a knowledge item into raw texts.
#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, knowledge: &Knowledge) -> Result<Vec<Text>>;

    /// Called once the pipeline is done with `knowledge`, whether or not
    /// loading succeeded.
    async fn on_load_finished(&self, _knowledge: &Knowledge) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Splits a composite knowledge item into child items.
#[async_trait::async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, knowledge: &Knowledge) -> Result<Vec<Knowledge>>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Splits loaded text into chunk-sized pieces.
#[async_trait::async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, knowledge: &Knowledge, text: Text) -> Result<Vec<Text>>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Maps text to vectors.
#[async_trait::async_trait]
pub trait Embedding: Send + Sync {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .pop()
            .context("embedding backend returned no vector")
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Ranks chunks against a query.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, chunks: &[Chunk], top_k: usize) -> Result<Vec<RetrievalChunk>>;

    async fn health_check(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Register types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegisterType {
    Decomposer,
    Embedding,
    KnowledgeLoader,
    Retriever,
    Parser,
}

impl RegisterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decomposer => "decomposer",
            Self::Embedding => "embedding",
            Self::KnowledgeLoader => "knowledge_loader",
            Self::Retriever => "retriever",
            Self::Parser => "parser",
        }
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Table<T: ?Sized> {
    kind: RegisterType,
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Table<T> {
    fn new(kind: RegisterType) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    fn register(&mut self, key: String, component: Arc<T>, healthy: bool) -> bool {
        if !healthy {
            warn!(register_type = %self.kind, key = %key, "health check failed, component not registered");
            return false;
        }
        if self.entries.insert(key.clone(), component).is_some() {
            debug!(register_type = %self.kind, key = %key, "replaced registered component");
        } else {
            debug!(register_type = %self.kind, key = %key, "registered component");
        }
        true
    }

    fn get(&self, key: &str) -> Result<Arc<T>> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("No implementation registered for type: {}.{key}", self.kind))
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Component tables, one per [`RegisterType`].
pub struct Registry {
    loaders: Table<dyn Loader>,
    decomposers: Table<dyn Decomposer>,
    parsers: Table<dyn Parser>,
    embeddings: Table<dyn Embedding>,
    retrievers: Table<dyn Retriever>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            loaders: Table::new(RegisterType::KnowledgeLoader),
            decomposers: Table::new(RegisterType::Decomposer),
            parsers: Table::new(RegisterType::Parser),
            embeddings: Table::new(RegisterType::Embedding),
            retrievers: Table::new(RegisterType::Retriever),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.list()).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with every built-in component.  Components whose
    /// health check fails (e.g. the OpenAI embedding without an API key)
    /// are left out.
    pub async fn with_builtins(ctx: &PluginContext) -> Self {
        let mut registry = Self::new();
        let repos = Arc::clone(&ctx.repo_manager);
        let cleanup = ctx.config.loader.cleanup_after_load;

        registry
            .register_loader(
                KnowledgeSource::GithubRepo.as_str(),
                Arc::new(RepoLoader::new(Arc::clone(&repos), cleanup)),
            )
            .await;
        registry
            .register_loader(
                KnowledgeSource::GithubFile.as_str(),
                Arc::new(RepoFileLoader::new(Arc::clone(&repos))),
            )
            .await;
        registry
            .register_loader(KnowledgeSource::UserInputText.as_str(), Arc::new(TextLoader))
            .await;

        registry
            .register_decomposer(
                KnowledgeType::GithubRepo.as_str(),
                Arc::new(RepoDecomposer::new(Arc::clone(&repos))),
            )
            .await;

        let parser: Arc<dyn Parser> = Arc::new(TextParser);
        for kind in TEXT_PARSER_TYPES {
            registry.register_parser(kind.as_str(), Arc::clone(&parser)).await;
        }

        registry
            .register_embedding(
                OPENAI_EMBEDDING,
                Arc::new(OpenAiEmbedding::from_config(&ctx.config.embedding, ctx.http.clone())),
            )
            .await;

        registry
            .register_retriever(SimpleRetriever::NAME, Arc::new(SimpleRetriever))
            .await;

        info!(components = ?registry.list(), "built-in components registered");
        registry
    }

    // -- registration -------------------------------------------------------

    pub async fn register_loader(&mut self, key: impl Into<String>, loader: Arc<dyn Loader>) -> bool {
        let healthy = loader.health_check().await;
        self.loaders.register(key.into(), loader, healthy)
    }

    pub async fn register_decomposer(
        &mut self,
        key: impl Into<String>,
        decomposer: Arc<dyn Decomposer>,
    ) -> bool {
        let healthy = decomposer.health_check().await;
        self.decomposers.register(key.into(), decomposer, healthy)
    }

    pub async fn register_parser(&mut self, key: impl Into<String>, parser: Arc<dyn Parser>) -> bool {
        let healthy = parser.health_check().await;
        self.parsers.register(key.into(), parser, healthy)
    }

    pub async fn register_embedding(
        &mut self,
        key: impl Into<String>,
        embedding: Arc<dyn Embedding>,
    ) -> bool {
        let healthy = embedding.health_check().await;
        self.embeddings.register(key.into(), embedding, healthy)
    }

    pub async fn register_retriever(
        &mut self,
        key: impl Into<String>,
        retriever: Arc<dyn Retriever>,
    ) -> bool {
        let healthy = retriever.health_check().await;
        self.retrievers.register(key.into(), retriever, healthy)
    }

    // -- lookup -------------------------------------------------------------

    pub fn get_loader(&self, key: &str) -> Result<Arc<dyn Loader>> {
        self.loaders.get(key)
    }

    pub fn get_decomposer(&self, key: &str) -> Result<Arc<dyn Decomposer>> {
        self.decomposers.get(key)
    }

    pub fn get_parser(&self, key: &str) -> Result<Arc<dyn Parser>> {
        self.parsers.get(key)
    }

    pub fn get_embedding(&self, key: &str) -> Result<Arc<dyn Embedding>> {
        self.embeddings.get(key)
    }

    pub fn get_retriever(&self, key: &str) -> Result<Arc<dyn Retriever>> {
        self.retrievers.get(key)
    }

    pub fn has_decomposer(&self, key: &str) -> bool {
        self.decomposers.entries.contains_key(key)
    }

    /// Registered keys per register type, sorted.
    pub fn list(&self) -> BTreeMap<RegisterType, Vec<String>> {
        BTreeMap::from([
            (RegisterType::Decomposer, self.decomposers.keys()),
            (RegisterType::Embedding, self.embeddings.keys()),
            (RegisterType::KnowledgeLoader, self.loaders.keys()),
            (RegisterType::Retriever, self.retrievers.keys()),
            (RegisterType::Parser, self.parsers.keys()),
        ])
    }
}

// ---------------------------------------------------------------------------
// Plugin context
// ---------------------------------------------------------------------------

/// Shared services handed to built-in components.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub config: Arc<Config>,
    pub repo_manager: Arc<RepoManager>,
    pub http: reqwest::Client,
}

impl PluginContext {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ragkit/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        let repo_manager = Arc::new(RepoManager::new(&config, http.clone())?);
        Ok(Self {
            config: Arc::new(config),
            repo_manager,
            http,
        })
    }
}

// ---------------------------------------------------------------------------
// Process-wide registry
// ---------------------------------------------------------------------------

static GLOBAL: OnceCell<Arc<Registry>> = OnceCell::const_new();

/// Install the built-in registry for the process.  Later calls return the
/// registry built by the first one.
pub async fn init_global(ctx: &PluginContext) -> Arc<Registry> {
    GLOBAL
        .get_or_init(|| async { Arc::new(Registry::with_builtins(ctx).await) })
        .await
        .clone()
}

/// The process-wide registry, if [`init_global`] has run.
pub fn global() -> Option<Arc<Registry>> {
    GLOBAL.get().cloned()
}
