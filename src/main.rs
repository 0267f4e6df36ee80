//! `hearth` — a locally-hosted personal assistant. Orchestrates a durable
//! Task Store through a Pre-Pipeline and Agentic Executor behind an HTTP
//! streaming interface, while a Heartbeat Scheduler drives the same queue
//! autonomously between requests.

mod cli;
mod context;
mod proactive;
mod server;

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cli::{Cli, Commands};
use context::Core;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        build = env!("BUILD_NUMBER"),
        "hearth starting"
    );

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { port } => run_serve(port).await,
        Commands::Tasks { command } => cli::tasks::run(command).await.map(|_| 0),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "hearth exited with an error");
            ExitCode::from(1)
        }
    }
}

/// Boots the core, spawns the heartbeat, and serves HTTP until a shutdown
/// signal arrives. Returns the process exit code: 0 for a clean shutdown,
/// 130 if a second `Ctrl-C` arrives before the graceful drain completes.
async fn run_serve(port: u16) -> anyhow::Result<u8> {
    let core = Core::bootstrap().await?;

    let heartbeat = core.heartbeat.clone();
    let heartbeat_handle = tokio::spawn(heartbeat.clone().start());

    let app = server::build_router(core.clone());
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "hearth listening");

    let mut exit_code = 0u8;
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(first_ctrl_c()).await {
        error!(error = %e, "http server error");
        exit_code = 1;
    }

    // First Ctrl-C already resolved `first_ctrl_c()` above and triggered the
    // graceful drain (in-flight requests finish, no new ones accepted). Pre-empt
    // the heartbeat's in-flight task the same way a user message would, then
    // give it a moment to return the task to pending before we stop it outright.
    core.heartbeat.pause_for_user();
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("second interrupt received, exiting without further drain");
            exit_code = 130;
        }
    }

    core.heartbeat.stop();
    heartbeat_handle.abort();

    info!("hearth shut down");
    Ok(exit_code)
}

async fn first_ctrl_c() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
}
