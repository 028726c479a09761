//! runway - run one task from the command line.
//!
//! Usage: `runway <question...>` (or the question on stdin). Output messages
//! are printed to stdout as JSON lines; logs go to stderr.

use std::io::Read;
use std::sync::Arc;

use runway::config::Config;
use runway::llm::OpenRouterClient;
use runway::messages::{FnSink, OutputMessage};
use runway::{InMemorySession, TaskRunner};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runway=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        std::io::stdin().read_to_string(&mut question)?;
    }
    let question = question.trim().to_string();
    if question.is_empty() {
        anyhow::bail!("usage: runway <question>");
    }

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration: model={}", config.execution.model);

    let mut client = OpenRouterClient::new(config.api_key.clone());
    if let Some(base_url) = &config.base_url {
        client = client.with_endpoint(base_url.clone());
    }

    let sink = FnSink(|message: &OutputMessage| -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(message)?);
        Ok(())
    });
    let runner = Arc::new(
        TaskRunner::new(Arc::new(client), config.execution.clone()).with_sink(Arc::new(sink)),
    );

    let abort_handle = Arc::clone(&runner);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort_handle.abort_current_run(Some("interrupted"));
        }
    });

    let mut session = InMemorySession::new();
    let result = runner.run_task_detailed(&mut session, &question).await?;
    if !result.completed {
        std::process::exit(2);
    }

    Ok(())
}
