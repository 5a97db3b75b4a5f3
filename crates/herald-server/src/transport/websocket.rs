//! TLS WebSocket listener using tokio-rustls and tokio-tungstenite.
//!
//! Each accepted TCP connection is TLS-terminated and upgraded on its own
//! task; established connections are handed to the server over a channel.

use crate::session::PeerInfo;
use herald_core::{Frame, HeraldError, HeraldResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection<S = TlsStream<TcpStream>> {
    /// The WebSocket stream (split into sink + stream by the connection manager).
    pub ws_stream: WebSocketStream<S>,
    /// Remote address and upgrade request headers.
    pub peer: PeerInfo,
}

/// Start the TLS WebSocket listener.
///
/// Returns the bound address and a receiver that yields upgraded connections.
/// The accept loop stops once the receiver is dropped.
pub async fn start_listener(
    bind_addr: SocketAddr,
    tls_config: Arc<rustls::ServerConfig>,
) -> HeraldResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| HeraldError::Transport(format!("bind {bind_addr} failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;
    let acceptor = TlsAcceptor::from(tls_config);

    info!(addr = %local_addr, "WebSocket (TLS) listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                () = tx.closed() => {
                    debug!("connection channel closed, stopping listener");
                    break;
                }
                accepted = tcp_listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        let tls_stream = match acceptor.accept(stream).await {
                            Ok(s) => s,
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "TLS handshake failed");
                                return;
                            }
                        };
                        match upgrade(tls_stream, addr).await {
                            Ok(conn) => {
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

/// Perform the WebSocket upgrade on an established stream, capturing the
/// request headers.
pub async fn upgrade<S>(stream: S, remote_addr: SocketAddr) -> HeraldResult<WebSocketConnection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut headers = Vec::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            headers = req
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            Ok(response)
        },
    )
    .await
    .map_err(|e| HeraldError::Transport(format!("WebSocket upgrade failed: {e}")))?;

    debug!(remote = %remote_addr, "WebSocket connection accepted");
    Ok(WebSocketConnection {
        ws_stream,
        peer: PeerInfo {
            remote_addr,
            headers,
        },
    })
}

/// Convert an outbound frame into a WebSocket message.
pub fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
    }
}

/// Extract the data frame from a WebSocket message. Control messages yield `None`.
pub fn from_message(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(text) => Some(Frame::Text(text.to_string())),
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        _ => None,
    }
}
