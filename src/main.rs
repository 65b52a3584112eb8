use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use freight_intake::config::IntakeConfig;
use freight_intake::llm::create_provider;
use freight_intake::pipeline::types::InboundMessage;
use freight_intake::pipeline::{IntakeOutcome, IntakeProcessor, spawn_clarification_sweeper};
use freight_intake::review::ReviewQueue;
use freight_intake::store::{IntakeStore, LibSqlStore};

/// One line of stdout per input message.
#[derive(Serialize)]
#[serde(untagged)]
enum OutputLine<'a> {
    Processed {
        message_id: &'a str,
        #[serde(flatten)]
        outcome: &'a IntakeOutcome,
    },
    Failed {
        message_id: &'a str,
        error: String,
        retryable: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = IntakeConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.llm.backend,
        model = %config.llm.model,
        db = %config.db_path,
        "Freight intake starting"
    );

    let llm = create_provider(&config.llm).context("Failed to create text-service provider")?;

    // ── Store ───────────────────────────────────────────────────────
    let store: Arc<dyn IntakeStore> = Arc::new(
        LibSqlStore::new_local(Path::new(&config.db_path))
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );

    // ── Pipeline ────────────────────────────────────────────────────
    let review = ReviewQueue::new();
    let processor = Arc::new(
        IntakeProcessor::from_config(llm, store, Arc::clone(&review), &config)
            .context("Invalid pipeline configuration")?,
    );

    // Abandons overdue clarifications from earlier runs, then keeps sweeping.
    let (sweeper, sweeper_shutdown) =
        spawn_clarification_sweeper(Arc::clone(&processor), config.clarification.sweep_interval);

    // ── Input ───────────────────────────────────────────────────────
    let mut messages = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(&line) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(line = line_no, error = %e, "Skipping malformed input line"),
        }
    }
    info!(count = messages.len(), "Messages read");

    // ── Process ─────────────────────────────────────────────────────
    let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
    let results = processor.process_batch(messages).await;

    // Stop the background sweeper between sweeps, then sweep once more so
    // anything that went overdue during the run is abandoned and reported.
    let _ = sweeper_shutdown.send(true);
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Clarification sweeper ended abnormally");
    }
    processor
        .sweep_expired()
        .await
        .context("Final clarification sweep failed")?;

    let mut stdout = tokio::io::stdout();
    for (message_id, result) in ids.iter().zip(&results) {
        let line = match result {
            Ok(outcome) => OutputLine::Processed {
                message_id,
                outcome,
            },
            Err(e) => OutputLine::Failed {
                message_id,
                error: e.to_string(),
                retryable: e.is_retryable(),
            },
        };
        write_line(&mut stdout, &line).await?;
    }

    // Open review items follow the outcomes as `{"review": ...}` lines.
    let open_reviews = review
        .write_open_items(&mut stdout)
        .await
        .context("Failed to write review items")?;
    if open_reviews > 0 {
        warn!(count = open_reviews, "Conversations waiting for human review");
    }

    info!("Freight intake finished");
    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &OutputLine<'_>) -> anyhow::Result<()> {
    let mut json = serde_json::to_string(line).context("Failed to encode output line")?;
    json.push('\n');
    stdout
        .write_all(json.as_bytes())
        .await
        .context("Failed to write stdout")
}

/// Initialize tracing. With a log directory, logs roll daily to files;
/// otherwise they go to stderr so stdout stays machine-readable.
fn init_tracing(log_dir: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "freight-intake.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
