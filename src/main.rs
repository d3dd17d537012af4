use clap::{Parser, Subcommand};
use policy_rag::commands::{
    add_document, ask, delete_document, list_documents, search, show_status, update_document,
};
use policy_rag::config::{Config, resolve_base_dir, run_interactive_config, show_config};
use policy_rag::{RagError, Result};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "policy-rag")]
#[command(about = "A document vector store with semantic search and question answering")]
#[command(version)]
struct Cli {
    /// Directory holding config, documents and the vector store
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Store and index a text document
    Add {
        /// Path of the document to add
        path: PathBuf,
        /// Document id to store it under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List stored documents
    List,
    /// Find the passages most similar to a query
    Search {
        query: String,
        /// Number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Answer a question from the stored documents
    Ask {
        question: String,
        /// Number of passages to use as context
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Delete a document and its vectors
    Delete {
        /// Document id
        id: String,
    },
    /// Replace a document with a new version
    Update {
        /// Document id
        id: String,
        /// Path of the new version
        path: PathBuf,
    },
    /// Show store statistics and consistency
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = resolve_base_dir(cli.base_dir.as_deref())
        .map_err(|e| RagError::InvalidConfiguration(e.to_string()))?;

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&base_dir)?;
        } else {
            run_interactive_config(&base_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Add { path, name } => {
            add_document(&config, &path, name.as_deref())?;
        }
        Commands::List => {
            list_documents(&config)?;
        }
        Commands::Search { query, top_k } => {
            search(&config, &query, top_k)?;
        }
        Commands::Ask { question, top_k } => {
            ask(&config, &question, top_k)?;
        }
        Commands::Delete { id } => {
            delete_document(&config, &id)?;
        }
        Commands::Update { id, path } => {
            update_document(&config, &id, &path)?;
        }
        Commands::Status => {
            show_status(&config)?;
        }
    }

    Ok(())
}
