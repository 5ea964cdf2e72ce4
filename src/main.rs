mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cmdgate_mcp::{CmdgateServer, serve_stdio};
use tokio::sync::watch;

use crate::config::Config;

/// MCP server that runs cat, ls, bazel and git behind path, argument and
/// subcommand checks. Speaks JSON-RPC on stdin/stdout, logs to stderr.
#[derive(Debug, Parser)]
#[command(name = "cmdgate", version, about)]
struct Cli {
    /// TOML configuration file; defaults apply when it does not exist.
    #[arg(long, env = "CMDGATE_CONFIG", default_value = "cmdgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    tracing::info!(
        blocked_paths = ?config.tools.security.blocked_paths,
        timeout_ms = config.tools.shell.timeout_ms,
        "configuration loaded"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let server = CmdgateServer::from_config(&config.tools);
    serve_stdio(server, async move {
        if shutdown_rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await
    .context("MCP server failed")?;

    tracing::info!("cmdgate stopped");
    Ok(())
}

/// Stdout carries the protocol, so every log line goes to stderr.
fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!("failed to listen for SIGTERM: {e:#}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {e:#}");
                std::future::pending::<()>().await;
            }
            return;
        }
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("failed to listen for ctrl-c: {e:#}");
                term.recv().await;
            }
        }
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e:#}");
        std::future::pending::<()>().await;
    }
}
