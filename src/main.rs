//! # Sidekick CLI (`sidekick`)
//!
//! Index folders, search them, and ask the agent questions from the shell.
//!
//! ## Usage
//!
//! ```bash
//! sidekick --config ./config/sidekick.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sidekick index <path>` | Index a folder or file (`--force` rebuilds) |
//! | `sidekick remove <path>` | Drop an index and delete its store |
//! | `sidekick list` | Show every index in the manifest |
//! | `sidekick search "<query>"` | Search indexed documents |
//! | `sidekick ask "<prompt>"` | Run the agent, continuing a saved session |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level
//! (default `sidekick=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sidekick::config::{self, Config};
use sidekick::session::{ChatOptions, ChatService, FileSessionStore};
use sidekick::{IndexOptions, Sidekick};

/// Sidekick: a retrieval-augmented chat assistant over your folders.
#[derive(Parser)]
#[command(name = "sidekick", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sidekick.toml`. When that default file does not
    /// exist the built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/sidekick.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a folder or a single file.
    Index {
        path: PathBuf,

        /// Delete any existing index for the path and build it again.
        #[arg(long)]
        force: bool,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Only index files directly inside the folder.
        #[arg(long)]
        no_recursive: bool,
    },

    /// Remove a folder's index and delete its vector store.
    Remove { path: PathBuf },

    /// List indexed folders and files.
    List,

    /// Search indexed documents.
    Search {
        query: String,

        /// Folder to search; defaults to the first indexed one.
        #[arg(long)]
        folder: Option<PathBuf>,

        /// Number of results.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Ask the agent a question.
    Ask {
        prompt: String,

        /// Folder the document search tool should use.
        #[arg(long)]
        folder: Option<PathBuf>,

        /// Comma-separated tool groups or names (rag, files, web_search,
        /// python, wikipedia). All tools when omitted.
        #[arg(long, value_delimiter = ',')]
        tools: Option<Vec<String>>,

        /// Default number of document chunks per search.
        #[arg(long, default_value_t = 0)]
        top_k: usize,

        /// Session owner.
        #[arg(long, default_value = "local")]
        user: String,

        /// Session name; defaults to the folder, or `default`.
        #[arg(long)]
        session: Option<String>,
    },
}

fn read_config(path: &Path) -> Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    if path != Path::new("./config/sidekick.toml") {
        anyhow::bail!("Config file not found: {}", path.display());
    }
    let mut cfg = Config::default();
    config::apply_env_overrides(&mut cfg);
    config::validate(&cfg)?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sidekick=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = read_config(&cli.config)?;
    let sessions_path = cfg.storage.sessions_path();
    let sidekick = Arc::new(Sidekick::from_config(cfg).await?);

    match cli.command {
        Commands::Index {
            path,
            force,
            chunk_size,
            chunk_overlap,
            no_recursive,
        } => {
            let status = sidekick
                .index_path(
                    &path,
                    IndexOptions {
                        force_reindex: force,
                        chunk_size,
                        chunk_overlap,
                        recursive: no_recursive.then_some(false),
                    },
                )
                .await;
            println!("{}", status);
        }
        Commands::Remove { path } => {
            println!("{}", sidekick.remove_path(&path).await);
        }
        Commands::List => {
            let indexes = sidekick.list_indexes().await;
            if indexes.is_empty() {
                println!("No indexes.");
            }
            for entry in indexes {
                let marker = if entry.loaded { "" } else { "  (not loaded)" };
                println!("{}\n    {}{}", entry.key, entry.location.display(), marker);
            }
        }
        Commands::Search { query, folder, k } => {
            println!("{}", sidekick.search(&query, k, folder.as_deref()).await);
        }
        Commands::Ask {
            prompt,
            folder,
            tools,
            top_k,
            user,
            session,
        } => {
            let scope = session
                .or_else(|| folder.as_ref().map(|f| f.display().to_string()))
                .unwrap_or_else(|| "default".to_string());
            let chat = ChatService::new(
                Arc::clone(&sidekick),
                Arc::new(FileSessionStore::new(sessions_path)),
            );
            let options = ChatOptions {
                folder,
                enabled_tools: tools,
                top_k,
            };
            let (reply, state) = chat.chat(&user, &scope, &prompt, &options).await?;
            info!(thread = %state.thread_id, messages = state.messages.len(), "session saved");
            println!("{}", reply);
        }
    }

    sidekick.close().await;
    Ok(())
}
