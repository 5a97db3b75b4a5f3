//! herald-server: topic-routed WebSocket server.
//!
//! Accepts WebSocket connections over TLS, routes each JSON message to the
//! handler registered for its topic, and pushes a periodic status message to
//! every connected client.

mod config;
mod connection;
mod handlers;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{Overrides, ServerConfig};
use server::HeraldServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use transport::tls;

/// herald-server: topic-routed WebSocket server
#[derive(Parser, Debug)]
#[command(name = "herald-server", version, about = "Topic-routed WebSocket server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// TLS certificate (PEM)
    #[arg(long)]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long)]
    key: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.herald/config.toml")]
    config: String,

    /// Directory served by the getSampleImage topic
    #[arg(long)]
    sample_dir: Option<String>,

    /// Generate self-signed certificate for development
    #[arg(long)]
    generate_cert: bool,

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

    info!(version = env!("CARGO_PKG_VERSION"), "starting herald-server");

    // Resolve cert/key paths
    let (cert, key) = if cli.generate_cert {
        let dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".herald");
        match tls::generate_self_signed_cert(&dir) {
            Ok((c, k)) => {
                info!(cert = %c.display(), key = %k.display(), "generated self-signed certificate");
                (
                    Some(c.display().to_string()),
                    Some(k.display().to_string()),
                )
            }
            Err(e) => {
                error!(error = %e, "failed to generate self-signed certificate");
                std::process::exit(1);
            }
        }
    } else {
        (cli.cert.clone(), cli.key.clone())
    };

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        Overrides {
            port: cli.port,
            bind: cli.bind.clone(),
            cert,
            key,
            sample_dir: cli.sample_dir.clone(),
            max_sessions: cli.max_sessions,
        },
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Load TLS config
    let tls_config = match tls::load_tls_config(&server_config.cert_path, &server_config.key_path)
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load TLS config");
            std::process::exit(1);
        }
    };

    // Create server
    let herald_server = match HeraldServer::new(server_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    // Run until shutdown signal
    if let Err(e) = herald_server
        .run(Arc::new(tls_config), shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("herald-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
