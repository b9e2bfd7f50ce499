//! Financial document analyzer binary
//!
//! Run with: cargo run -p fin-analyzer -- serve

use clap::{Parser, Subcommand};
use fin_analyzer::{
    analysis::{OllamaAnalyzer, WorkerContext},
    config::{AnalyzerConfig, BrokerBackend},
    processing::{self, Broker, WorkerPool},
    server::{state::AppState, AnalyzerServer},
    storage::{DocumentStore, LocalDocumentStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fin-analyzer", version, about = "Asynchronous financial document analysis")]
struct Cli {
    /// TOML configuration file (overrides FIN_ANALYZER_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API, with embedded workers unless disabled
    Serve {
        /// Do not start workers in this process
        #[arg(long)]
        no_workers: bool,
    },
    /// Run workers only (needs a shared broker such as Redis)
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fin_analyzer=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║               Financial Document Analyzer                 ║
║          Queued analysis with status polling              ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    let config = AnalyzerConfig::load(cli.config.as_deref())?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Broker: {:?} ({})", config.broker.backend, config.broker.url);
    tracing::info!("  - Result TTL: {}s", config.broker.result_ttl_secs);
    tracing::info!(
        "  - Retries: {} every {}s",
        config.worker.max_retries,
        config.worker.retry_delay_secs
    );
    tracing::info!("  - Upload dir: {}", config.storage.upload_dir.display());
    tracing::info!("  - LLM model: {}", config.llm.model);

    let broker = processing::connect_broker(&config.broker).await?;
    let documents: Arc<dyn DocumentStore> =
        Arc::new(LocalDocumentStore::new(config.storage.upload_dir.clone()));

    match cli.command.unwrap_or(Command::Serve { no_workers: false }) {
        Command::Serve { no_workers } => {
            let embedded = config.worker.embedded && !no_workers;
            serve(config, broker, documents, embedded).await
        }
        Command::Worker => work(config, broker, documents).await,
    }
}

async fn serve(
    config: AnalyzerConfig,
    broker: Arc<dyn Broker>,
    documents: Arc<dyn DocumentStore>,
    embedded: bool,
) -> anyhow::Result<()> {
    let pool = if embedded {
        Some(start_workers(&config, broker.clone(), documents.clone()).await?)
    } else {
        if config.broker.backend == BrokerBackend::Memory {
            tracing::warn!(
                "Workers disabled with the in-memory broker: queued jobs will never run"
            );
        }
        None
    };

    let state = AppState::new(config, broker, documents);
    let server = AnalyzerServer::new(state.clone());

    println!("\nServer starting...");
    println!("  UI: http://{}/", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /analyze          - Upload a document for analysis");
    println!("  GET  /status/:job_id   - Poll job status");
    println!("\nPress Ctrl+C to stop\n");

    state.set_ready(true);
    server.start(shutdown_signal()).await?;
    state.set_ready(false);

    if let Some(pool) = pool {
        tracing::info!("Waiting for in-progress jobs to finish...");
        pool.shutdown().await;
    }
    Ok(())
}

async fn work(
    config: AnalyzerConfig,
    broker: Arc<dyn Broker>,
    documents: Arc<dyn DocumentStore>,
) -> anyhow::Result<()> {
    if config.broker.backend == BrokerBackend::Memory {
        anyhow::bail!(
            "The worker command needs a shared broker; set broker.backend = \"redis\" \
             (BROKER_BACKEND=redis) so the API process can reach it"
        );
    }

    let pool = start_workers(&config, broker, documents).await?;
    shutdown_signal().await;
    tracing::info!("Waiting for in-progress jobs to finish...");
    pool.shutdown().await;
    Ok(())
}

async fn start_workers(
    config: &AnalyzerConfig,
    broker: Arc<dyn Broker>,
    documents: Arc<dyn DocumentStore>,
) -> anyhow::Result<WorkerPool> {
    // Check Ollama
    tracing::info!("Checking Ollama at {}...", config.llm.base_url);
    let probe = OllamaAnalyzer::new(&config.llm)?;
    if probe.health_check().await {
        tracing::info!("Ollama is running");
    } else {
        tracing::warn!("Ollama not available at {}", config.llm.base_url);
        tracing::warn!("Jobs will be retried and then fail until it is reachable:");
        tracing::warn!("  1. Start: ollama serve");
        tracing::warn!("  2. Pull model: ollama pull {}", config.llm.model);
    }

    let context = WorkerContext::from_config(config)?;
    Ok(WorkerPool::spawn(config, broker, documents, context))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
