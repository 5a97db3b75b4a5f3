//! Core server: accepts connections and hands them to the connection manager.
//!
//! Owns the handler registry (built once, shared read-only) and the session
//! table. Coordinates shutdown of every open session.

use crate::config::ServerConfig;
use crate::connection::{ConnectionLimits, ConnectionManager};
use crate::handlers::HandlerRegistry;
use crate::session::SessionManager;
use crate::transport::websocket;
use herald_core::{HeraldError, HeraldResult};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// The herald server instance.
pub struct HeraldServer {
    /// Server configuration.
    config: ServerConfig,
    /// Connection lifecycle and dispatch.
    connections: Arc<ConnectionManager>,
}

impl HeraldServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig) -> HeraldResult<Self> {
        if !config.sample_dir.is_dir() {
            warn!(
                path = %config.sample_dir.display(),
                "sample directory does not exist, getSampleImage will always fail"
            );
        }

        let registry = HandlerRegistry::with_builtins(&config.sample_dir, &config.timing);
        info!(topics = ?registry.topics(), "handlers registered");

        let sessions = Arc::new(SessionManager::new(config.max_sessions));
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(registry),
            sessions,
            config.timing,
            ConnectionLimits {
                max_frame_size: config.max_frame_size,
                outbound_queue: config.outbound_queue,
            },
        ));

        Ok(Self {
            config,
            connections,
        })
    }

    /// Address the listener binds to.
    pub fn bind_addr(&self) -> HeraldResult<SocketAddr> {
        format!("{}:{}", self.config.bind, self.config.port)
            .parse()
            .map_err(|e| HeraldError::Config(format!("invalid bind address: {e}")))
    }

    /// Accept connections until `shutdown` completes, then close every session.
    pub async fn run<F>(self, tls_config: Arc<rustls::ServerConfig>, shutdown: F) -> HeraldResult<()>
    where
        F: Future<Output = ()>,
    {
        let bind_addr = self.bind_addr()?;
        let (local_addr, mut conn_rx) = websocket::start_listener(bind_addr, tls_config).await?;

        info!(
            addr = %local_addr,
            "herald-server ready on wss://localhost:{}",
            local_addr.port()
        );

        let mut stats = tokio::time::interval(Duration::from_secs(60));
        stats.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = stats.tick() => {
                    let sessions = self.connections.sessions().list().await;
                    debug!(open = sessions.len(), "session stats");
                    for s in &sessions {
                        trace!(
                            session_id = %s.id,
                            remote = %s.remote_addr,
                            age_secs = s.age_secs,
                            timers = s.active_timers,
                            "session"
                        );
                    }
                }
                conn = conn_rx.recv() => match conn {
                    Some(conn) => {
                        let connections = Arc::clone(&self.connections);
                        tokio::spawn(async move {
                            if let Err(e) = connections.serve(conn).await {
                                debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    None => {
                        info!("listener closed, shutting down");
                        break;
                    }
                },
            }
        }

        let closed = self.connections.sessions().close_all().await;
        info!(sessions = closed, "closed open sessions");
        Ok(())
    }
}
