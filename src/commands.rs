use anyhow::{Context, Result, bail};
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{Config, MemoryBackend};
use crate::database::{LanceVectorIndex, SqliteConversationStore};
use crate::embeddings::OllamaClient;
use crate::mcp::docintel_server;
use crate::mcp::tools::{format_answer_details, format_history};
use crate::service::{DocIntelService, open_conversation_store};

/// Answer one question and print the answer followed by its evaluation
#[inline]
pub async fn ask(config: &Config, question: &str, conversation_id: Option<&str>) -> Result<()> {
    let service = DocIntelService::from_config(config)
        .await
        .context("Failed to initialize DocIntel")?;

    let cancel = cancel_on_ctrl_c();
    let spinner = spinner("Thinking...");
    let answer = service.answer(question, conversation_id, cancel.clone()).await;
    spinner.finish_and_clear();
    cancel.cancel();
    let answer = answer?;

    println!("{}", answer.text);
    println!();
    println!("Evaluation:");
    println!("{}", answer.evaluation);
    if answer.evaluation.is_degraded() {
        eprintln!(
            "{}",
            style("⚠️  This answer could not be validated against the documents.").yellow()
        );
    }
    eprintln!();
    eprintln!("{}", style(format_answer_details(&answer)).dim());
    eprintln!(
        "{}",
        style(format!(
            "Continue with: docintel ask --conversation {} \"...\"",
            answer.conversation_id
        ))
        .dim()
    );

    Ok(())
}

/// Print a conversation, or the known conversations when no id is given
#[inline]
pub async fn show_history(config: &Config, conversation_id: Option<&str>) -> Result<()> {
    let Some(conversation_id) = conversation_id else {
        return list_conversations(config).await;
    };

    let store = open_conversation_store(config).await?;
    let messages = store.read(conversation_id).await?;
    if messages.is_empty() {
        println!("No messages in conversation {}", conversation_id);
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "Conversation {} ({} messages):",
            conversation_id,
            messages.len()
        ))
        .bold()
    );
    println!("{}", format_history(&messages));
    Ok(())
}

async fn list_conversations(config: &Config) -> Result<()> {
    if config.memory.backend != MemoryBackend::Sqlite {
        bail!("Conversations are only kept across runs with the sqlite memory backend");
    }

    let store = SqliteConversationStore::initialize_from_config_dir(
        config.get_base_dir(),
        config.memory.max_messages,
    )
    .await?;
    let ids = store.conversation_ids().await?;
    if ids.is_empty() {
        println!("No conversations yet.");
        println!("Use 'docintel ask \"<question>\"' to start one.");
        return Ok(());
    }

    println!("Conversations ({} total, most recent first):", ids.len());
    for id in ids {
        println!("  {}", id);
    }
    Ok(())
}

#[inline]
pub async fn clear_conversation(config: &Config, conversation_id: &str) -> Result<()> {
    let store = open_conversation_store(config).await?;
    store.clear(conversation_id).await?;
    println!("Cleared conversation {}", conversation_id);
    Ok(())
}

/// Extract, transform and index one PDF
#[inline]
pub async fn ingest_pdf(
    config: &Config,
    path: &Path,
    file_name: Option<&str>,
    print_json: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = match file_name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("Path has no file name; pass --name")?,
    };

    let service = DocIntelService::from_config(config)
        .await
        .context("Failed to initialize DocIntel")?;

    let cancel = cancel_on_ctrl_c();
    let spinner = spinner(&format!("Extracting {}...", file_name));
    let report = service.ingest(bytes, &file_name, &cancel).await;
    spinner.finish_and_clear();
    cancel.cancel();
    let report = report?;

    if print_json {
        println!("{}", report.raw_extraction_json);
    }
    eprintln!(
        "✅ Indexed {} page(s) from {}",
        report.record_count, report.file_name
    );
    if let Some(total) = report.usage.and_then(|usage| usage.total) {
        eprintln!("   Tokens used in extraction: {}", total);
    }
    Ok(())
}

/// Show where things live and how much has been indexed
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("{}", style("📊 DocIntel Status").bold().cyan());
    println!("   Config directory: {}", config.get_base_dir().display());
    println!(
        "   Chat model: {} ({})",
        config.chat.model,
        config.chat.provider.as_str()
    );
    println!(
        "   Extraction model: {} ({})",
        config.extraction.model,
        config.extraction.provider.as_str()
    );
    println!("   Judge: {:?}", config.evaluation.judge);

    let client = OllamaClient::new(&config.ollama)?;
    let health = tokio::task::spawn_blocking({
        let client = client.clone();
        move || client.health_check()
    })
    .await?;
    match health {
        Ok(()) => println!("   ✅ Ollama ready with model {}", client.model()),
        Err(e) => println!("   ❌ Ollama not ready: {}", e),
    }

    match LanceVectorIndex::open(&config.vector_database_path(), Arc::new(client)).await {
        Ok(index) => println!("   📄 Indexed pages: {}", index.count().await?),
        Err(e) => println!("   ❌ Vector index unavailable: {}", e),
    }

    if config.memory.backend == MemoryBackend::Sqlite {
        let store = SqliteConversationStore::initialize_from_config_dir(
            config.get_base_dir(),
            config.memory.max_messages,
        )
        .await?;
        println!(
            "   💬 Conversations: {}",
            store.conversation_ids().await?.len()
        );
    } else {
        println!("   💬 Conversations are kept in memory only");
    }

    Ok(())
}

/// Serve the MCP tools on stdio until EOF or Ctrl+C. Nothing but protocol
/// messages may be written to stdout here.
#[inline]
pub async fn serve_mcp(config: &Config) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let health = tokio::task::spawn_blocking(move || client.health_check()).await?;
    if let Err(e) = health {
        warn!("⚠️  Ollama is reachable but unhealthy: {}", e);
        eprintln!("Warning: Ollama may not be ready. Ingestion and retrieval may fail.");
    }

    let service = Arc::new(
        DocIntelService::from_config(config)
            .await
            .context("Failed to initialize DocIntel")?,
    );
    let server = docintel_server(&service);

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    eprintln!("\n📴 Received interrupt signal, shutting down...");
                }
                shutdown.cancel();
            }
            () = shutdown.cancelled() => {}
        }
    });

    eprintln!("✅ MCP server ready with tools: ask, history, clear_conversation, ingest_pdf");
    eprintln!("Note: This server uses stdio transport. Connect via MCP client.");
    server.serve_stdio().await?;
    eprintln!("✅ Shutdown complete");
    Ok(())
}

/// A token cancelled by Ctrl+C. Cancel it yourself once the work is done so
/// the watcher task exits.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        eprintln!("\nCancelling...");
                    }
                    cancel.cancel();
                }
                () = cancel.cancelled() => {}
            }
        }
    });
    cancel
}

fn spinner(message: &str) -> ProgressBar {
    if !Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner().with_message(message.to_string());
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
