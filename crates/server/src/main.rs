//! Opex Server
//!
//! Axum server and CLI around the workflow pipeline in `opex_core`.

mod api;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use opex_core::agent::{
    Coordinator, ObserverRegistry, ProgressEvent, ProgressSink, RunRequest, StepStatus,
};
use opex_core::config::AgentConfig;

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub observers: Arc<ObserverRegistry>,
    pub config: Arc<AgentConfig>,
}

impl AppState {
    pub fn new(coordinator: Coordinator, config: AgentConfig) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            observers: Arc::new(ObserverRegistry::new()),
            config: Arc::new(config),
        }
    }
}

#[derive(Parser, Clone)]
#[command(author, version, about = "Opex - Workflow diagram and procedure document agent")]
struct Args {
    /// Config file (default: .opex/config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the model name
    #[arg(long, global = true)]
    model: Option<String>,
    /// Override the revision cap
    #[arg(long, global = true)]
    max_revisions: Option<u32>,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3001")]
        port: u16,
    },
    /// Run the pipeline once and print the result
    Run {
        /// Process description
        prompt: String,
        /// Chat session id; reuse one to revise an earlier result
        #[arg(long)]
        session: Option<String>,
    },
}

impl Args {
    fn resolve_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = AgentConfig::resolve(self.config.as_deref())?;
        if let Some(model) = &self.model {
            config.model.model = model.clone();
        }
        if let Some(max_revisions) = self.max_revisions {
            config.max_revisions = max_revisions;
        }
        Ok(config)
    }
}

/// Prints stage transitions for `opex run`
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: &ProgressEvent) {
        if let ProgressEvent::Status {
            label,
            status: StepStatus::Start,
            ..
        } = event
        {
            eprintln!("→ {}", label);
        }
    }
}

async fn serve(config: AgentConfig, port: u16) -> anyhow::Result<()> {
    let coordinator = Coordinator::from_config(&config)?;
    tracing::info!(config = ?config.redacted(), "configuration loaded");

    let app = api::router(AppState::new(coordinator, config));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Opex server listening");
    println!("Opex server running at http://{}", addr);
    println!("   Run:      POST /run, POST /chat (SSE)");
    println!("   Progress: /ws/:chat_session_id (WebSocket)");
    println!("   Ops:      /health, /api/v1/config, /api/v1/openapi.json");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

async fn run_once(config: AgentConfig, prompt: String, session: Option<String>) -> anyhow::Result<()> {
    let coordinator = Coordinator::from_config(&config)?.with_token_streaming(false);
    let session = session.unwrap_or_else(|| {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        format!("cli-{}", secs)
    });

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let sink: Arc<dyn ProgressSink> = Arc::new(ConsoleSink);
    let output = coordinator
        .run(RunRequest::new(session, prompt), Some(sink), cancel)
        .await?;

    println!("Session:   {}", output.chat_session_id);
    println!("Status:    {}", serde_json::to_string(&output.status)?);
    println!("Revisions: {}", output.revisions);
    if let Some(diagram) = &output.diagram {
        println!("\n```mermaid\n{}\n```", diagram);
    }
    if let Some(document) = &output.document {
        println!("\n{}", document);
    }
    println!("\n{}", output.assistant_message);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("opex_core=info,opex_server=info")),
        )
        .init();

    let args = Args::parse();
    let config = args.resolve_config()?;

    match args.command {
        Some(CliCommand::Run { prompt, session }) => run_once(config, prompt, session).await,
        Some(CliCommand::Serve { port }) => serve(config, port).await,
        None => serve(config, 3001).await,
    }
}
