use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Metadata;

/// Default embedding model name.
pub const OPENAI_EMBEDDING: &str = "openai";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Where a knowledge item comes from.  Loaders are registered per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    GithubRepo,
    GithubFile,
    UserInputText,
    UserUploadFile,
}

impl KnowledgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GithubRepo => "github_repo",
            Self::GithubFile => "github_file",
            Self::UserInputText => "user_input_text",
            Self::UserUploadFile => "user_upload_file",
        }
    }
}

/// Content type of a knowledge item.  Parsers and decomposers are registered
/// per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    Text,
    Image,
    Markdown,
    Json,
    Docx,
    Pdf,
    Qa,
    Folder,
    GithubRepo,
    Rst,
    Python,
    Js,
    Ts,
    Go,
    Java,
    Cpp,
    C,
    #[serde(rename = "csharp")]
    CSharp,
    Kotlin,
    Swift,
    Php,
    Ruby,
    Rust,
    Scala,
    Sol,
    Html,
    Lua,
    Latex,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Docx => "docx",
            Self::Pdf => "pdf",
            Self::Qa => "qa",
            Self::Folder => "folder",
            Self::GithubRepo => "github_repo",
            Self::Rst => "rst",
            Self::Python => "python",
            Self::Js => "js",
            Self::Ts => "ts",
            Self::Go => "go",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::CSharp => "csharp",
            Self::Kotlin => "kotlin",
            Self::Swift => "swift",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Rust => "rust",
            Self::Scala => "scala",
            Self::Sol => "sol",
            Self::Html => "html",
            Self::Lua => "lua",
            Self::Latex => "latex",
        }
    }

    /// Map a file extension (including the leading dot, any case) to a
    /// knowledge type.  Unknown extensions are treated as plain text.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            ".md" | ".mdx" => Self::Markdown,
            ".json" => Self::Json,
            ".pdf" => Self::Pdf,
            ".docx" => Self::Docx,
            ".rst" => Self::Rst,
            ".py" => Self::Python,
            ".js" => Self::Js,
            ".ts" => Self::Ts,
            ".go" => Self::Go,
            ".java" => Self::Java,
            ".cpp" | ".hpp" => Self::Cpp,
            ".c" | ".h" => Self::C,
            ".cs" => Self::CSharp,
            ".kt" => Self::Kotlin,
            ".swift" => Self::Swift,
            ".php" => Self::Php,
            ".rb" => Self::Ruby,
            ".rs" => Self::Rust,
            ".scala" => Self::Scala,
            ".sol" => Self::Sol,
            ".html" => Self::Html,
            ".lua" => Self::Lua,
            ".tex" => Self::Latex,
            ".jpg" | ".jpeg" | ".png" | ".gif" | ".bmp" | ".svg" => Self::Image,
            // .txt, .css, .m, .sh, .yml, .yaml and everything else
            _ => Self::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Source configs
// ---------------------------------------------------------------------------

fn default_repo_url() -> String {
    "https://github.com".to_string()
}

/// Location of a Git repository on a forge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSourceConfig {
    /// `owner/name` of the repository.
    pub repo_name: String,
    /// Base URL of the forge, e.g. `https://github.com`.
    #[serde(default = "default_repo_url")]
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_id: Option<String>,
    /// Access token embedded into the clone URL.
    #[serde(default)]
    pub auth_info: Option<String>,
}

impl RepoSourceConfig {
    pub fn new(repo_name: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            url: default_repo_url(),
            branch: None,
            commit_id: None,
            auth_info: None,
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// A single file inside a Git repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFileSourceConfig {
    #[serde(flatten)]
    pub repo: RepoSourceConfig,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSourceConfig {
    pub text: String,
}

/// Source configuration of a knowledge item.
///
/// Variant order matters for untagged deserialisation: a file config is a
/// repo config plus `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceConfig {
    RepoFile(RepoFileSourceConfig),
    Repo(RepoSourceConfig),
    Text(TextSourceConfig),
}

impl SourceConfig {
    /// The repository part of a repo or repo-file config.
    pub fn repo(&self) -> Option<&RepoSourceConfig> {
        match self {
            Self::RepoFile(file) => Some(&file.repo),
            Self::Repo(repo) => Some(repo),
            Self::Text(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Split configs
// ---------------------------------------------------------------------------

fn default_chunk_size() -> usize {
    1500
}

fn default_chunk_overlap() -> usize {
    150
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSplitConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Separators tried in order; an empty list selects the defaults.
    #[serde(default)]
    pub separators: Vec<String>,
}

impl Default for TextSplitConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: Vec::new(),
        }
    }
}

/// File selection rules applied when decomposing a repository.  Patterns
/// use `.gitignore` syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoParseConfig {
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "bool_true")]
    pub use_gitignore: bool,
    #[serde(default = "bool_true")]
    pub use_default_ignore: bool,
}

fn bool_true() -> bool {
    true
}

impl Default for RepoParseConfig {
    /// Markdown only, without `.gitignore`, with the default ignore list.
    fn default() -> Self {
        Self {
            include_patterns: vec!["*.md".to_string(), "*.mdx".to_string()],
            ignore_patterns: Vec::new(),
            use_gitignore: false,
            use_default_ignore: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitConfig {
    Text(TextSplitConfig),
    Markdown(TextSplitConfig),
    GithubRepo(RepoParseConfig),
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self::Text(TextSplitConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Knowledge
// ---------------------------------------------------------------------------

/// A unit of ingestible content.
///
/// Deserialisation goes through [`KnowledgeRecord`] so that user-entered
/// text gets its digest however the value is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "KnowledgeRecord")]
pub struct Knowledge {
    pub knowledge_id: String,
    pub space_id: String,
    pub tenant_id: String,
    pub knowledge_type: KnowledgeType,
    pub knowledge_name: String,
    pub source_type: KnowledgeSource,
    pub source_config: SourceConfig,
    pub embedding_model_name: String,
    pub split_config: SplitConfig,
    pub file_sha: Option<String>,
    pub file_size: Option<u64>,
    pub metadata: Metadata,
    pub parent_id: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire form of [`Knowledge`], with defaults for omitted fields.
#[derive(Deserialize)]
struct KnowledgeRecord {
    #[serde(default = "new_knowledge_id")]
    knowledge_id: String,
    space_id: String,
    tenant_id: String,
    #[serde(default = "default_knowledge_type")]
    knowledge_type: KnowledgeType,
    knowledge_name: String,
    #[serde(default = "default_source")]
    source_type: KnowledgeSource,
    source_config: SourceConfig,
    #[serde(default = "default_embedding_model_name")]
    embedding_model_name: String,
    #[serde(default)]
    split_config: SplitConfig,
    #[serde(default)]
    file_sha: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default = "bool_true")]
    enabled: bool,
    #[serde(default = "Utc::now", alias = "gmt_create")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", alias = "gmt_modified")]
    updated_at: DateTime<Utc>,
}

impl From<KnowledgeRecord> for Knowledge {
    fn from(r: KnowledgeRecord) -> Self {
        let mut knowledge = Self {
            knowledge_id: r.knowledge_id,
            space_id: r.space_id,
            tenant_id: r.tenant_id,
            knowledge_type: r.knowledge_type,
            knowledge_name: r.knowledge_name,
            source_type: r.source_type,
            source_config: r.source_config,
            embedding_model_name: r.embedding_model_name,
            split_config: r.split_config,
            file_sha: r.file_sha,
            file_size: r.file_size,
            metadata: r.metadata,
            parent_id: r.parent_id,
            enabled: r.enabled,
            created_at: r.created_at,
            updated_at: r.updated_at,
        };
        knowledge.fill_text_digest();
        knowledge
    }
}

fn new_knowledge_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_knowledge_type() -> KnowledgeType {
    KnowledgeType::Text
}

fn default_source() -> KnowledgeSource {
    KnowledgeSource::UserInputText
}

fn default_embedding_model_name() -> String {
    OPENAI_EMBEDDING.to_string()
}

impl Knowledge {
    pub fn new(
        space_id: impl Into<String>,
        tenant_id: impl Into<String>,
        knowledge_name: impl Into<String>,
        source_type: KnowledgeSource,
        knowledge_type: KnowledgeType,
        source_config: SourceConfig,
    ) -> Self {
        let now = Utc::now();
        let mut knowledge = Self {
            knowledge_id: new_knowledge_id(),
            space_id: space_id.into(),
            tenant_id: tenant_id.into(),
            knowledge_type,
            knowledge_name: knowledge_name.into(),
            source_type,
            source_config,
            embedding_model_name: default_embedding_model_name(),
            split_config: SplitConfig::default(),
            file_sha: None,
            file_size: None,
            metadata: Metadata::new(),
            parent_id: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        knowledge.fill_text_digest();
        knowledge
    }

    /// For user-entered text, derive `file_sha` (sha256 hex) and `file_size`
    /// (UTF-8 bytes) from the text unless a digest is already present.
    pub fn fill_text_digest(&mut self) {
        if self.source_type != KnowledgeSource::UserInputText || self.file_sha.is_some() {
            return;
        }
        if let SourceConfig::Text(text) = &self.source_config {
            self.file_sha = Some(sha256_hex(text.text.as_bytes()));
            self.file_size = Some(text.text.len() as u64);
        }
    }

    /// Repository config of a repo or repo-file knowledge.
    pub fn repo_config(&self) -> Option<&RepoSourceConfig> {
        self.source_config.repo()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Lowercase hex sha256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
