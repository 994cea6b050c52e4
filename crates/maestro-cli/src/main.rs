//! The `maestro` binary: serve the HTTP/WebSocket surface or run a
//! single task from the terminal.

use anyhow::Context;
use clap::{Parser, Subcommand};
use maestro_events::ProgressBus;
use maestro_orchestrator::{MemoryTaskStore, Orchestrator, TaskSpec, TaskStatus};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro — LLM agent task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "maestro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one task to completion, streaming its progress
    Run {
        /// What the task should accomplish
        description: String,
        /// Number of agent iterations
        #[arg(long, default_value_t = 1)]
        iterations: u32,
        /// Gate completion behind a quality evaluation
        #[arg(long)]
        quality_gate: bool,
    },
}

#[derive(Deserialize)]
struct MaestroConfig {
    /// Model used for `run` tasks.
    model: String,
    /// Bearer credential; falls back to `MAESTRO_API_KEY`.
    #[serde(default)]
    credential: Option<String>,
    #[serde(default)]
    server: ServerConfig,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn load_config(path: &PathBuf) -> anyhow::Result<MaestroConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn build_orchestrator() -> Arc<Orchestrator> {
    let store = Arc::new(MemoryTaskStore::new());
    let bus = Arc::new(ProgressBus::new());
    Arc::new(Orchestrator::new(store, bus))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let credential = config
        .credential
        .clone()
        .or_else(|| std::env::var("MAESTRO_API_KEY").ok())
        .context("no credential in config and MAESTRO_API_KEY unset")?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);
            let addr = format!("{host}:{port}");

            let orchestrator = build_orchestrator();
            let router = maestro_server::build_router(orchestrator);

            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!(addr = %addr, "Maestro server listening");
            axum::serve(listener, router).await?;
        }

        Commands::Run {
            description,
            iterations,
            quality_gate,
        } => {
            let orchestrator = build_orchestrator();

            let mut spec = TaskSpec::new(description, &config.model, &credential);
            spec.max_iterations = iterations;
            spec.quality_gate = quality_gate;

            let receipt = orchestrator.create_task(spec).await?;
            let stream = orchestrator.subscribe(receipt.task_id);
            orchestrator.spawn_task(receipt.task_id);

            while let Some(event) = stream.recv().await {
                println!(
                    "[{}] {} {}",
                    event.timestamp.format("%H:%M:%S"),
                    serde_json::to_string(&event.kind)?,
                    event.data
                );
                if matches!(
                    event.kind,
                    maestro_events::EventKind::Task(
                        maestro_events::TaskEvent::Completed
                            | maestro_events::TaskEvent::Failed
                            | maestro_events::TaskEvent::Cancelled
                    )
                ) {
                    break;
                }
            }

            let record = orchestrator.get_status(receipt.task_id).await?;
            match record.status {
                TaskStatus::Completed => {
                    if let Some(result) = &record.result {
                        println!("{}", result["final"].as_str().unwrap_or_default());
                    }
                }
                status => {
                    eprintln!(
                        "task ended {status:?}: {}",
                        record.error.unwrap_or_default()
                    );
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
