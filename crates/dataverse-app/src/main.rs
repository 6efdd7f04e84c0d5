//! DataVerse chat binary - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Initialize tracing (stderr, so revealed answers own stdout)
//! 3. Build the HTTP backend and the chat orchestrator
//! 4. Render conversation events to the terminal
//! 5. Read questions from stdin (or answer one `--question`) until EOF

mod cli;
mod render;

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use dataverse_chat::{ChatError, ChatOrchestrator, HttpBackend};
use dataverse_core::config::DataverseConfig;

use cli::CliArgs;
use render::TerminalRenderer;

/// Forward conversation events to stdout until the orchestrator goes away.
async fn render_loop(chat: Arc<ChatOrchestrator>) {
    let mut rx = chat.subscribe();
    drop(chat);
    let mut renderer = TerminalRenderer::new(std::io::stdout());

    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(e) = renderer.handle(&event) {
                    tracing::error!(error = %e, "Failed to write to stdout");
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Renderer fell behind; events dropped");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Submit `question` and wait for the exchange to finish.
async fn ask(chat: &ChatOrchestrator, question: &str) -> Result<(), ChatError> {
    chat.set_draft(question)?;
    match chat.submit().await {
        Ok(report) => {
            tracing::debug!(
                exchange = %report.exchange,
                phase = %report.phase,
                query_failed = report.query_failed,
                "Exchange finished"
            );
            Ok(())
        }
        // Already reported to the user by the renderer.
        Err(ChatError::Backend(_)) | Err(ChatError::InvalidResponse(_)) => Ok(()),
        Err(ChatError::EmptyMessage) => Ok(()),
        Err(e) => Err(e),
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Interactive session: one question per line, `/new` resets, `/quit` exits.
async fn repl(chat: &ChatOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", dataverse_core::types::WELCOME_CONTENT);
    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => chat.new_chat()?,
            question => {
                tokio::select! {
                    result = ask(chat, question) => result?,
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so the file can set the log level; the
    // outcome is logged once the subscriber exists.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(DataverseConfig::load(&config_file))
    } else {
        None
    };
    let mut config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => DataverseConfig::default(),
    };

    // Tracing.
    let filter = args.resolve_log_filter(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    tracing::info!("Starting DataVerse chat v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Some(Ok(_)) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(Err(e)) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config. Using defaults."
        ),
        None => tracing::info!(path = %config_file.display(), "No config file; using defaults"),
    }

    config.api.base_url = args.resolve_base_url(&config.api.base_url);
    let backend = HttpBackend::new(&config.api)?;
    tracing::info!(
        chat = %config.api.chat_url(),
        execute = %config.api.execute_url(),
        "Backend configured"
    );

    let chat = Arc::new(ChatOrchestrator::new(Arc::new(backend), config.streaming.clone()));
    let renderer = tokio::spawn(render_loop(Arc::clone(&chat)));

    let outcome = match args.question {
        Some(ref question) => ask(&chat, question).await.map_err(Into::into),
        None => repl(&chat).await,
    };

    chat.shutdown();
    drop(chat);
    // The store closes its channel once the last orchestrator handle is gone.
    if let Err(e) = renderer.await {
        tracing::warn!(error = %e, "Renderer task ended abnormally");
    }

    outcome
}
