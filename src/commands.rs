use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, EmbedderKind};
use crate::embeddings::{Embedder, HashingEmbedder, OllamaClient};
use crate::engine::VectorStoreEngine;
use crate::qa::answer_question;
use crate::{ErrorKind, RagError};

pub type DynEngine = VectorStoreEngine<Box<dyn Embedder>>;

/// Build the configured embedder
#[inline]
pub fn build_embedder(config: &Config) -> Result<Box<dyn Embedder>> {
    let dimension = config.ollama.embedding_dimension as usize;
    match config.embedder {
        EmbedderKind::Ollama => {
            let client =
                OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
            Ok(Box::new(client))
        }
        EmbedderKind::Hashing => Ok(Box::new(HashingEmbedder::new(dimension)?)),
    }
}

/// Open the vector store under the configured base directory
#[inline]
pub fn open_engine(config: &Config) -> Result<DynEngine> {
    let embedder = build_embedder(config)?;
    VectorStoreEngine::open(embedder, config.chunking, config.get_base_dir()).with_context(|| {
        format!(
            "Failed to open vector store in {}",
            config.get_base_dir().display()
        )
    })
}

fn spinner(message: String) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Store a text document and index its chunks
#[inline]
pub fn add_document(config: &Config, path: &Path, name: Option<&str>) -> Result<()> {
    info!("Adding document: {}", path.display());
    let engine = open_engine(config)?;

    let bar = spinner(format!("Embedding {}", path.display()));
    let result = engine.ingest_file(path, name);
    bar.finish_and_clear();

    match result {
        Ok(report) => {
            println!("Added document: {}", report.document_id);
            println!("  Chunks indexed: {}", report.chunks_indexed);
            println!("  Vector dimension: {}", report.dimension);
            println!("  Total vectors: {}", engine.count());
            Ok(())
        }
        Err(RagError::DuplicateDocument(id)) => {
            println!("Document already exists: {}", id);
            println!("Use 'policy-rag update {} <path>' to replace it.", id);
            Err(RagError::DuplicateDocument(id).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// List stored documents with their chunk counts
#[inline]
pub fn list_documents(config: &Config) -> Result<()> {
    let engine = open_engine(config)?;
    let documents = engine.list_documents()?;

    if documents.is_empty() {
        println!("No documents have been added yet.");
        println!("Use 'policy-rag add <path>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();

    for document in &documents {
        println!("📄 {}", document.id);
        println!("   Chunks: {}", document.chunks);
        match document.size {
            Some(size) => println!("   Size: {} bytes", size),
            None => println!("   Size: artifact missing"),
        }
        if let Some(modified) = document.modified {
            println!("   Modified: {}", modified.format("%Y-%m-%d %H:%M:%S"));
        }
        println!();
    }

    Ok(())
}

/// Print the chunks most similar to `query`
#[inline]
pub fn search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let engine = open_engine(config)?;
    let k = top_k.unwrap_or(config.search.default_top_k);
    let hits = engine.search(query, k)?;

    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!("{}. {} (score {:.4})", rank + 1, hit.filename, hit.score);
        println!("   {}", preview(&hit.text, 200));
        println!();
    }

    Ok(())
}

/// Answer `question` from the indexed documents
#[inline]
pub fn ask(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let engine = open_engine(config)?;
    let completer =
        OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    let k = top_k.unwrap_or(config.search.default_top_k);

    let bar = spinner("Thinking".to_string());
    let result = answer_question(&engine, &completer, question, k);
    bar.finish_and_clear();
    let answer = result?;

    println!("{}", answer.answer);
    if !answer.context.is_empty() {
        println!();
        println!("Sources:");
        for hit in &answer.context {
            println!("  • {} (score {:.4})", hit.filename, hit.score);
        }
    }

    Ok(())
}

/// Remove a document and its vectors
#[inline]
pub fn delete_document(config: &Config, id: &str) -> Result<()> {
    let engine = open_engine(config)?;

    match engine.delete(id) {
        Ok(report) => {
            println!(
                "Deleted {} ({} chunks removed)",
                report.document_id, report.removed_chunks
            );
            println!("Remaining vectors: {}", engine.count());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            println!("Document not found: {}", id);
            println!("Use 'policy-rag list' to see stored documents.");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Replace a stored document with the contents of `path`
///
/// The previous version stays in place if the new file cannot be indexed.
#[inline]
pub fn update_document(config: &Config, id: &str, path: &Path) -> Result<()> {
    let engine = open_engine(config)?;

    let bar = spinner(format!("Embedding {}", path.display()));
    let result = engine.replace_file(id, path);
    bar.finish_and_clear();

    match result {
        Ok(report) => {
            println!(
                "Updated {}: {} chunks replaced by {}",
                report.document_id, report.removed_chunks, report.chunks_indexed
            );
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            println!("Document not found: {}", id);
            println!("Use 'policy-rag add' to store a new document.");
            Err(e.into())
        }
        Err(e) => {
            warn!("Update of {} failed, previous version kept: {}", id, e);
            Err(e).with_context(|| format!("Failed to update {}", id))
        }
    }
}

/// Show store statistics, embedder health and a consistency report
#[inline]
pub fn show_status(config: &Config) -> Result<()> {
    println!("📊 Policy RAG Status");
    println!();

    println!("🗂  Store: {}", config.get_base_dir().display());
    let engine = open_engine(config)?;
    let snapshot = engine.snapshot();
    println!("   Generation: {}", snapshot.generation);
    println!("   Vectors: {}", snapshot.count());
    println!("   Dimension: {}", snapshot.dimension());
    println!(
        "   Documents indexed: {}",
        snapshot.metadata.document_chunk_counts().len()
    );

    println!();
    match config.embedder {
        EmbedderKind::Hashing => println!("🔢 Embedder: local hashing"),
        EmbedderKind::Ollama => {
            println!("🦙 Embedder: Ollama ({})", config.ollama.model);
            match OllamaClient::new(&config.ollama).and_then(|client| client.health_check()) {
                Ok(()) => println!("   ✅ Ollama is healthy"),
                Err(e) => println!("   ❌ Ollama check failed: {:#}", e),
            }
        }
    }

    println!();
    println!("🔍 Consistency:");
    match engine.consistency_report() {
        Ok(report) => {
            if report.is_consistent {
                println!("   ✅ {}", report.summary());
            } else {
                println!("   ⚠️  {}", report.summary());
            }
            if !report.documents_without_artifact.is_empty() {
                println!(
                    "   🚫 Indexed without artifact: {}",
                    report.documents_without_artifact.join(", ")
                );
            }
            if !report.artifacts_without_chunks.is_empty() {
                println!(
                    "   👻 Stored but not indexed: {}",
                    report.artifacts_without_chunks.join(", ")
                );
            }
        }
        Err(e) => println!("   ❌ Failed to check consistency: {}", e),
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'policy-rag add <path>' to index a document");
    println!("   • Use 'policy-rag search <query>' to find relevant passages");
    println!("   • Use 'policy-rag ask <question>' to get an answer");

    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
