//! # ragspace CLI
//!
//! The `ragspace` binary drives the ingestion and retrieval pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragspace init` | Create the SQLite database and the default space |
//! | `ragspace ingest <path>` | Ingest a file or directory into a space |
//! | `ragspace spaces list` | List all spaces with unit counts |
//! | `ragspace spaces delete <name>` | Delete a space (the default space is protected) |
//! | `ragspace query "<question>"` | Retrieve context and answer a question |
//! | `ragspace serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! ragspace init --config ./ragspace.toml
//! ragspace ingest ./docs --space feeds
//! ragspace query "when does the loyalty feed land?" --space feeds
//! ragspace spaces list
//! ragspace serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use ragspace::chunk::Chunker;
use ragspace::config::{self, Config};
use ragspace::coordinator::QueryCoordinator;
use ragspace::{db, embedding, ingest, llm, server, store::SpaceStore};

/// Retrieval-augmented question answering over isolated document spaces.
#[derive(Parser)]
#[command(
    name = "ragspace",
    about = "Retrieval-augmented question answering over isolated document spaces",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./ragspace.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and the default space.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Ingest a file or directory into a space.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,

        /// Target space name.
        #[arg(long, default_value = "default")]
        space: String,
    },

    /// Manage spaces.
    Spaces {
        #[command(subcommand)]
        action: SpacesAction,
    },

    /// Ask a question against a space.
    ///
    /// Retrieves the top-k units and, when an llm provider is configured,
    /// synthesizes an answer from them.
    Query {
        /// The question to answer.
        question: String,

        /// Space to query.
        #[arg(long, default_value = "default")]
        space: String,

        /// Override the number of units retrieved.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum SpacesAction {
    /// List all spaces with their unit counts.
    List,
    /// Delete a space. The protected default space is refused.
    Delete {
        /// Space name.
        name: String,
    },
}

/// Builds the shared pipeline state from configuration, resolving API keys
/// from the environment when the file leaves them unset.
async fn build_coordinator(config: &Config) -> anyhow::Result<Arc<QueryCoordinator>> {
    let pool = db::connect(config).await?;
    let embedder: Arc<dyn embedding::EmbeddingProvider> =
        embedding::create_provider(&config.embedding)?.into();
    let chat: Arc<dyn llm::ChatModel> = llm::create_chat_model(&config.llm)?.into();
    let store = Arc::new(SpaceStore::new(
        pool,
        embedder,
        config.store.protected_space.clone(),
    ));
    Ok(Arc::new(QueryCoordinator::new(
        store,
        chat,
        config.retrieval.k,
    )))
}

fn resolve_api_keys(config: &mut Config) {
    if config.embedding.api_key.is_none() {
        config.embedding.api_key = std::env::var("OPENAI_API_KEY").ok();
    }
    if config.llm.api_key.is_none() {
        config.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;
    resolve_api_keys(&mut cfg);

    match cli.command {
        Commands::Init => {
            let coordinator = build_coordinator(&cfg).await?;
            coordinator
                .store()
                .ensure_space(cfg.store.protected_space.as_str())
                .await?;
            println!("Database initialized at {}", cfg.store.path.display());
        }
        Commands::Ingest { path, space } => {
            let coordinator = build_coordinator(&cfg).await?;
            let chunker = Chunker::new(&cfg.chunking);
            if path.is_dir() {
                let report = ingest::ingest_directory(
                    coordinator.store(),
                    &chunker,
                    &cfg,
                    &space,
                    &path,
                )
                .await?;
                println!(
                    "Ingested {} files ({} units) into '{}'; {} skipped.",
                    report.files_ingested, report.units_added, space, report.files_skipped
                );
            } else {
                let units =
                    ingest::ingest_file(coordinator.store(), &chunker, &space, &path).await?;
                println!("Ingested {} units into '{}'.", units, space);
            }
        }
        Commands::Spaces { action } => {
            let coordinator = build_coordinator(&cfg).await?;
            match action {
                SpacesAction::List => {
                    let spaces = coordinator.store().list_spaces().await?;
                    if spaces.is_empty() {
                        println!("No spaces.");
                    }
                    for space in spaces {
                        let units = coordinator.store().count_units(&space).await?;
                        println!("{space}  ({units} units)");
                    }
                }
                SpacesAction::Delete { name } => {
                    coordinator.store().delete_space(&name).await?;
                    coordinator.invalidate(&name);
                    println!("Deleted space '{name}'.");
                }
            }
        }
        Commands::Query { question, space, k } => {
            if let Some(k) = k {
                cfg.retrieval.k = k;
            }
            let coordinator = build_coordinator(&cfg).await?;
            let results = if cfg.llm.is_enabled() {
                coordinator.query(&space, &question).await?
            } else {
                coordinator.retrieve(&space, &question).await?
            };
            for result in results {
                let generated = result
                    .metadata
                    .get("generated")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if generated {
                    println!("Answer: {}\n", result.text);
                } else {
                    println!("[{:.3}] {}", result.score, result.text);
                }
            }
        }
        Commands::Serve => {
            let coordinator = build_coordinator(&cfg).await?;
            server::run_server(Arc::new(cfg), coordinator).await?;
        }
    }

    Ok(())
}
