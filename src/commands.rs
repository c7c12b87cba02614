use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::answer::{AnswerComposer, RagRequest, RagResponse};
use crate::config::{Config, ProviderKind};
use crate::corpus::{list_saved_chats, load_corpus};
use crate::embeddings::create_embedder;
use crate::generation::create_generator;
use crate::index::{BuildReport, Sidecar, VectorStore, build_index};
use crate::providers::OllamaClient;
use crate::retrieval::{RetrievedPassage, Retriever};
use crate::server::{AppState, serve};

/// Embed the corpus and rewrite the index
#[inline]
pub async fn build(config: &Config) -> Result<BuildReport> {
    let embedder = create_embedder(config).context("Failed to set up the embedder")?;
    let report = build_index(config, embedder.as_ref())
        .await
        .context("Failed to build the index")?;

    if report.written {
        println!(
            "Indexed {} items ({} dimensions)",
            report.indexed, report.dimension
        );
    } else {
        println!("No documents found; index left unchanged.");
    }
    if report.skipped_files > 0 || report.skipped_entries > 0 {
        println!(
            "Skipped {} unreadable files and {} incomplete entries",
            report.skipped_files, report.skipped_entries
        );
    }

    Ok(report)
}

/// Answer composer wired to the configured providers and index
#[inline]
pub fn create_composer(config: &Config) -> Result<AnswerComposer> {
    let embedder = create_embedder(config).context("Failed to set up the embedder")?;
    let generator = create_generator(config).context("Failed to set up the generator")?;
    let retriever = Retriever::new(config.index_location(), embedder);

    Ok(AnswerComposer::new(
        Arc::new(retriever),
        generator,
        config.chat_dir(),
        config.answer.clone(),
    ))
}

/// Extract a query from piped input
///
/// A JSON object contributes its `query` (or `q`) field; anything else is
/// taken as plain text. Blank input yields `None`.
#[inline]
pub fn parse_query_input(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(object)) => ["query", "q"]
            .iter()
            .filter_map(|key| object.get(*key).and_then(serde_json::Value::as_str))
            .map(str::trim)
            .find(|query| !query.is_empty())
            .map(str::to_string),
        _ => Some(trimmed.to_string()),
    }
}

/// Answer one question
#[inline]
pub async fn ask(config: &Config, request: &RagRequest) -> Result<RagResponse> {
    let composer = create_composer(config)?;
    Ok(composer.handle(request).await)
}

/// Print the nearest passages for a query
#[inline]
pub async fn search(config: &Config, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
    let embedder = create_embedder(config).context("Failed to set up the embedder")?;
    let retriever = Retriever::new(config.index_location(), embedder);
    retriever
        .initialize()
        .await
        .context("Failed to load the index")?;

    let passages = retriever.query(query, k).await?;

    if passages.is_empty() {
        println!("No results.");
    }
    for (rank, passage) in passages.iter().enumerate() {
        println!(
            "{}. [{}] (distance {:.4})",
            rank + 1,
            passage.source,
            passage.distance
        );
        for line in passage.text.lines() {
            println!("   {}", line);
        }
    }

    Ok(passages)
}

/// Serve the HTTP API
#[inline]
pub async fn serve_http(config: &Config) -> Result<()> {
    let composer = create_composer(config)?;
    let state = AppState {
        composer: Arc::new(composer),
        chat_dir: config.chat_dir(),
    };

    info!("Starting HTTP server on {}:{}", config.server.host, config.server.port);
    serve(state, &config.server).await
}

/// Report corpus, index and provider health
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 RAG Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("📚 Corpus:");
    let chat_dir = config.chat_dir();
    let text_dir = config.text_dir();
    let load = load_corpus(&chat_dir, &text_dir);
    println!("   Chats: {}", chat_dir.display());
    println!("   Knowledge: {}", text_dir.display());
    println!(
        "   Documents: {} from {} files",
        load.documents.len(),
        load.files_read
    );
    println!("   Saved chats: {}", list_saved_chats(&chat_dir).len());
    if load.skipped_files > 0 || load.skipped_entries > 0 {
        println!(
            "   ⚠️  Skipped: {} files, {} entries",
            load.skipped_files, load.skipped_entries
        );
    }
    println!();

    println!("🔍 Index:");
    let location = config.index_location();
    match VectorStore::open(&location).await {
        Ok(None) => println!("   ⚠️  LanceDB: no index yet (run `ragchat build`)"),
        Ok(Some(store)) => match store.table_exists().await {
            Ok(true) => {
                println!("{}", row_count_line(&store.count_rows().await));
                if let Some(dimension) = store.dimension() {
                    println!("   🔢 Dimension: {}", dimension);
                }
            }
            Ok(false) => println!("   ⚠️  LanceDB: no index yet (run `ragchat build`)"),
            Err(e) => println!("   ❌ LanceDB: {}", e),
        },
        Err(e) => println!("   ❌ LanceDB: Failed to connect - {}", e),
    }
    match Sidecar::load(&location.sidecar_path) {
        Ok(sidecar) => {
            println!("   ✅ Sidecar: {} entries", sidecar.len());
            if !sidecar.embedder.is_empty() {
                println!("   🤖 Built with: {}", sidecar.embedder);
            }
            if let Some(built_at) = sidecar.built_at {
                println!("   🕒 Built: {}", built_at.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        Err(e) => println!("   ⚠️  Sidecar: {}", e),
    }
    println!();

    println!("🤖 Providers:");
    println!(
        "   Embedding: {} ({})",
        config.embedding.provider,
        config.embedding.model_name()
    );
    println!(
        "   Generation: {} ({})",
        config.generation.provider,
        config.generation.model_name()
    );

    let uses = |kind: ProviderKind| {
        config.embedding.provider == kind || config.generation.provider == kind
    };

    if uses(ProviderKind::Gemini) {
        match config.gemini_api_key() {
            Ok(_) => println!("   ✅ Gemini: API key found"),
            Err(e) => println!("   ❌ Gemini: {}", e),
        }
    }

    if uses(ProviderKind::Ollama) {
        let mut models = Vec::new();
        if config.embedding.provider == ProviderKind::Ollama {
            models.push(config.embedding.model_name());
        }
        if config.generation.provider == ProviderKind::Ollama {
            models.push(config.generation.model_name());
        }

        match OllamaClient::new(config) {
            Ok(client) => match client.health_check(&models) {
                Ok(()) => println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                ),
                Err(e) => println!("   ⚠️  Ollama: unhealthy - {:#}", e),
            },
            Err(e) => println!("   ❌ Ollama: {}", e),
        }
    }

    Ok(())
}

fn row_count_line(rows: &crate::Result<usize>) -> String {
    match rows {
        Ok(rows) => format!("   ✅ LanceDB: {} rows", rows),
        Err(e) => format!("   ❌ LanceDB: Failed to count rows - {}", e),
    }
}
