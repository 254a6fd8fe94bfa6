//! shellmux-server: persistent terminal multiplexer.
//!
//! Accepts WebSocket connections and runs PTY-backed shells in sessions that
//! outlive the connection, so a client can reattach and replay what it missed.

mod config;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::ShellServer;
use session::PtySpawner;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Persistent terminal multiplexer server
#[derive(Parser, Debug)]
#[command(name = "shellmux-server", version, about = "Persistent terminal multiplexer")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Config file path
    #[arg(long, default_value = "~/.shellmux/config.toml")]
    config: String,

    /// Shell to launch in new terminals
    #[arg(long)]
    shell: Option<String>,

    /// Default working directory for new terminals
    #[arg(long)]
    cwd: Option<String>,

    /// Seconds a detached session may stay idle before it is reaped
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Seconds between reaper sweeps
    #[arg(long)]
    reap_interval: Option<u64>,

    /// Per-terminal replay buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting shellmux-server");

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        bind: cli.bind,
        port: cli.port,
        shell: cli.shell,
        working_directory: cli.cwd,
        idle_timeout: cli.idle_timeout,
        reap_interval: cli.reap_interval,
        buffer_size: cli.buffer_size,
        max_sessions: cli.max_sessions,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = Arc::new(ShellServer::new(server_config, Arc::new(PtySpawner)));

    // Run until shutdown signal
    tokio::select! {
        result = server.clone().run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                server.shutdown().await;
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    server.shutdown().await;
    info!("shellmux-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
