use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ragkit::config::{self, LogFormat};
use ragkit::loader::get_file_by_path;
use ragkit::model::{
    Knowledge, KnowledgeSource, KnowledgeType, RepoParseConfig, RepoSourceConfig, SourceConfig,
    SplitConfig,
};
use ragkit::registry::{self, Loader};
use ragkit::{Ingestor, PluginContext};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "ragkit", version, about = "Knowledge ingestion toolkit")]
struct Cli {
    /// Path to the YAML configuration file.  Built-in defaults are used when
    /// omitted.
    #[arg(short, long, env = "RAGKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Override `logging.format` from the configuration.
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a repository into the cache (or reuse a valid checkout).
    Fetch(RepoArgs),
    /// Print the directory tree and first author of a repository.
    Tree(RepoArgs),
    /// List the per-file knowledge items a repository decomposes into.
    Decompose {
        #[command(flatten)]
        repo: RepoArgs,
        #[command(flatten)]
        patterns: PatternArgs,
    },
    /// Print one file of a repository as JSON.
    File {
        #[command(flatten)]
        repo: RepoArgs,
        /// Path relative to the repository root.
        path: String,
    },
    /// Remove the cached checkout of a repository.
    Cleanup(RepoArgs),
    /// Remove every expired checkout from the cache.
    Sweep,
    /// List the registered components.
    Plugins,
    /// Decompose, load, split and embed a repository; prints the chunks.
    Ingest {
        #[command(flatten)]
        repo: RepoArgs,
        #[command(flatten)]
        patterns: PatternArgs,
        /// Skip the embedding stage.
        #[arg(long)]
        no_embed: bool,
    },
}

#[derive(Args, Debug)]
struct RepoArgs {
    /// Repository as `owner/name`.
    repo_name: String,
    /// Forge base URL.
    #[arg(long, default_value = "https://github.com")]
    url: String,
    #[arg(long)]
    branch: Option<String>,
    #[arg(long)]
    commit: Option<String>,
    /// Name of an environment variable holding an access token.
    #[arg(long)]
    token_env: Option<String>,
}

impl RepoArgs {
    fn source(&self) -> Result<RepoSourceConfig> {
        let auth_info = match &self.token_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("environment variable {var} is not set"))?,
            ),
            None => None,
        };
        Ok(RepoSourceConfig {
            repo_name: self.repo_name.clone(),
            url: self.url.clone(),
            branch: self.branch.clone(),
            commit_id: self.commit.clone(),
            auth_info,
        })
    }

    fn knowledge(&self, split_config: SplitConfig) -> Result<Knowledge> {
        let mut knowledge = Knowledge::new(
            "cli",
            "cli",
            self.repo_name.clone(),
            KnowledgeSource::GithubRepo,
            KnowledgeType::GithubRepo,
            SourceConfig::Repo(self.source()?),
        );
        knowledge.split_config = split_config;
        Ok(knowledge)
    }
}

#[derive(Args, Debug)]
struct PatternArgs {
    /// Include pattern (gitignore syntax); repeatable.  Defaults to
    /// `*.md` and `*.mdx`.
    #[arg(long = "include")]
    include: Vec<String>,
    /// Ignore pattern (gitignore syntax); repeatable.
    #[arg(long = "ignore")]
    ignore: Vec<String>,
    /// Include every file not otherwise ignored.
    #[arg(long, conflicts_with = "include")]
    all: bool,
    /// Honour the repository's root `.gitignore`.
    #[arg(long)]
    gitignore: bool,
    /// Do not apply the built-in ignore list.
    #[arg(long)]
    no_default_ignore: bool,
}

impl PatternArgs {
    fn split_config(&self) -> SplitConfig {
        let mut parse = RepoParseConfig::default();
        if self.all {
            parse.include_patterns.clear();
        } else if !self.include.is_empty() {
            parse.include_patterns = self.include.clone();
        }
        parse.ignore_patterns = self.ignore.clone();
        parse.use_gitignore = self.gitignore;
        parse.use_default_ignore = !self.no_default_ignore;
        SplitConfig::GithubRepo(parse)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(cli.config.as_ref())?;

    // ---- Tracing ----
    let format = match cli.log_format {
        Some(LogFormatArg::Json) => LogFormat::Json,
        Some(LogFormatArg::Pretty) => LogFormat::Pretty,
        None => config.logging.format,
    };
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    match format {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    tracing::debug!(
        cache_path = %config.cache.path.display(),
        ttl_hours = config.cache.ttl_hours,
        "configuration loaded"
    );

    // ---- Components ----
    let ctx = PluginContext::new(config)?;
    let repos = ctx.repo_manager.clone();

    match cli.command {
        Command::Fetch(args) => {
            let cached = repos.checkout(&args.source()?).await?;
            print_json(&cached.meta)?;
        }
        Command::Tree(args) => {
            let loader = ragkit::loader::RepoLoader::new(repos, false);
            let knowledge = args.knowledge(SplitConfig::default())?;
            for text in loader.load(&knowledge).await? {
                println!("{}", text.content);
                for key in ["author_name", "author_email"] {
                    if let Some(value) = text.metadata.get(key).and_then(|v| v.as_str()) {
                        println!("{key}: {value}");
                    }
                }
            }
        }
        Command::Decompose { repo, patterns } => {
            let registry = registry::init_global(&ctx).await;
            let ingestor = Ingestor::new(registry);
            let children = ingestor
                .decompose(&repo.knowledge(patterns.split_config())?)
                .await?;
            print_json(&children)?;
        }
        Command::File { repo, path } => {
            let file = get_file_by_path(&repos, &repo.source()?, &path).await?;
            print_json(&file)?;
        }
        Command::Cleanup(args) => {
            let removed = repos.cleanup_repo(&args.source()?).await;
            tracing::info!(repo = %args.repo_name, removed, "cleanup finished");
        }
        Command::Sweep => {
            let removed = repos.cleanup_expired().await?;
            let remaining = repos.list_repos().await?;
            let size = repos.total_size_bytes()?;
            print_json(&serde_json::json!({
                "removed": removed,
                "remaining": remaining.iter().map(|m| &m.key).collect::<Vec<_>>(),
                "cache_bytes": size,
            }))?;
        }
        Command::Plugins => {
            let registry = registry::init_global(&ctx).await;
            let listing: std::collections::BTreeMap<_, _> = registry
                .list()
                .into_iter()
                .map(|(kind, keys)| (kind.as_str(), keys))
                .collect();
            print_json(&listing)?;
        }
        Command::Ingest {
            repo,
            patterns,
            no_embed,
        } => {
            let registry = registry::init_global(&ctx).await;
            let mut ingestor = Ingestor::new(registry);
            if no_embed {
                ingestor = ingestor.without_embedding();
            }
            let chunks = ingestor
                .ingest(&repo.knowledge(patterns.split_config())?)
                .await?;
            print_json(&chunks)?;
        }
    }

    Ok(())
}
