//! songpoll-ui - survey dashboard server and report tool
//!
//! `serve` runs the JSON API; `report` computes one dashboard bundle and
//! prints it as pretty JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use songpoll_common::charts::RankingView;
use songpoll_common::config::load_config;
use songpoll_common::dashboard::DashboardRequest;
use tokio::signal;
use tracing::info;
use songpoll_ui::{build_router, AppState};

/// Command-line arguments for songpoll-ui
#[derive(Parser, Debug)]
#[command(name = "songpoll-ui")]
#[command(about = "Song survey dashboard")]
#[command(version)]
struct Args {
    /// Config file (overrides SONGPOLL_CONFIG and the platform default)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Port to listen on (overrides [server].port)
        #[arg(short, long, env = "SONGPOLL_PORT")]
        port: Option<u16>,
    },

    /// Print one dashboard bundle as JSON
    Report {
        /// Voter email prefix
        #[arg(short, long)]
        user: Option<String>,

        /// Survey year (defaults to the configured default year)
        #[arg(short, long)]
        year: Option<u16>,

        /// Ranking view: overlay, average or user
        #[arg(long, default_value = "overlay")]
        view: RankingView,

        /// Include generated narratives
        #[arg(long)]
        insights: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing exists; its own messages are best effort
    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(
        "Starting songpoll-ui v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let state = AppState::from_config(&config).context("Failed to initialize services")?;

    match args.command {
        Command::Serve { port } => {
            let addr = format!("{}:{}", config.server.host, port.unwrap_or(config.server.port));
            let app = build_router(state);

            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind to {}", addr))?;
            info!("songpoll-ui listening on http://{}", addr);
            info!("Health check: http://{}/health", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;

            info!("Server shutdown complete");
        }
        Command::Report {
            user,
            year,
            view,
            insights,
            output,
        } => {
            let request = DashboardRequest {
                identifier: user,
                year: year.unwrap_or(config.default_year),
                view,
            };
            let bundle = state.service.dashboard(&request, insights).await;
            let json = serde_json::to_string_pretty(&bundle)?;

            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Report written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
