//! Connection manager: drives one WebSocket connection from upgrade to close.
//!
//! For every connection it opens a session, starts the status push, spawns
//! the writer task that owns the sink, and reads frames in arrival order,
//! routing each through the handler registry. When the transport ends (or a
//! write fails) the session is closed, which cancels every timer and task it
//! owns.

use crate::config::Timing;
use crate::handlers::{HandlerRegistry, Payload};
use crate::session::{Session, SessionManager};
use crate::transport::websocket::{from_message, to_message, WebSocketConnection};
use futures_util::{Sink, SinkExt, StreamExt};
use herald_core::{decode_frame, encode_json, Decoded, Envelope, Frame, HeraldResult, UPLOAD_TOPIC};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, trace, warn};

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Largest inbound data frame accepted; larger frames close the session.
    pub max_frame_size: usize,
    /// Capacity of each session's outbound queue.
    pub outbound_queue: usize,
}

/// Orchestrates the lifecycle of every connection.
pub struct ConnectionManager {
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    timing: Timing,
    limits: ConnectionLimits,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        sessions: Arc<SessionManager>,
        timing: Timing,
        limits: ConnectionLimits,
    ) -> Self {
        Self {
            registry,
            sessions,
            timing,
            limits,
        }
    }

    /// Access the session table.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Serve one upgraded connection until it closes.
    pub async fn serve<S>(&self, conn: WebSocketConnection<S>) -> HeraldResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let WebSocketConnection { ws_stream, peer } = conn;
        let remote = peer.remote_addr;
        let (mut sink, mut stream) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.limits.outbound_queue);

        let session = match self.sessions.open(peer, outbound_tx).await {
            Ok(session) => session,
            Err(e) => {
                warn!(remote = %remote, error = %e, "refusing connection");
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Again,
                        reason: "server busy".into(),
                    })))
                    .await;
                return Err(e);
            }
        };

        info!(
            session_id = %session.id(),
            remote = %remote,
            headers = ?session.peer().headers,
            "client connected"
        );

        self.start_status_timer(&session);
        let writer = tokio::spawn(write_loop(Arc::clone(&session), sink, outbound_rx));
        let closed = session.close_token();

        loop {
            let next = tokio::select! {
                biased;
                () = closed.cancelled() => {
                    debug!(session_id = %session.id(), "session closed while reading");
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Close(frame))) => {
                    debug!(session_id = %session.id(), ?frame, "peer sent close");
                    break;
                }
                Some(Ok(msg)) => {
                    let Some(frame) = from_message(msg) else {
                        continue;
                    };
                    if frame.len() > self.limits.max_frame_size {
                        warn!(
                            session_id = %session.id(),
                            bytes = frame.len(),
                            max = self.limits.max_frame_size,
                            "inbound frame too large, closing"
                        );
                        break;
                    }
                    self.dispatch(&session, frame).await;
                }
                Some(Err(e)) => {
                    debug!(session_id = %session.id(), error = %e, "read failed");
                    break;
                }
                None => {
                    debug!(session_id = %session.id(), "stream ended");
                    break;
                }
            }
        }

        let cancelled = match self.sessions.close(session.id()).await {
            Ok(n) => n,
            // Already removed by shutdown; make sure it is closed.
            Err(_) => session.close().unwrap_or(0),
        };
        if let Err(e) = writer.await {
            error!(session_id = %session.id(), error = %e, "writer task failed");
        }
        info!(session_id = %session.id(), timers_cancelled = cancelled, "client disconnected");
        Ok(())
    }

    /// Route one inbound frame to its handler.
    pub async fn dispatch(&self, session: &Arc<Session>, frame: Frame) {
        trace!(session_id = %session.id(), bytes = frame.len(), text = frame.is_text(), "received frame");
        match decode_frame(frame) {
            Decoded::Message(envelope) => {
                let handler = self.registry.resolve(envelope.topic());
                debug!(
                    session_id = %session.id(),
                    topic = envelope.topic(),
                    handler = handler.name(),
                    "dispatching message"
                );
                handler.invoke(session, Payload::Json(envelope.payload)).await;
            }
            Decoded::Opaque(bytes) => {
                let handler = self.registry.resolve(UPLOAD_TOPIC);
                debug!(
                    session_id = %session.id(),
                    bytes = bytes.len(),
                    handler = handler.name(),
                    "frame is not an envelope, routing as upload"
                );
                handler.invoke(session, Payload::Binary(bytes)).await;
            }
        }
    }

    fn start_status_timer(&self, session: &Arc<Session>) {
        let status = match encode_json(&Envelope::status()) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "cannot encode status message");
                return;
            }
        };
        let render = Box::new(move |_: u32| {
            trace!("sending status message");
            status.clone()
        });
        if session
            .schedule_repeating("status", self.timing.status_interval, None, render)
            .is_none()
        {
            debug!(session_id = %session.id(), "session closed before status timer started");
        }
    }
}

/// Drain the session's outbound queue into the WebSocket sink.
///
/// A write failure closes the session. On exit a close frame is sent best
/// effort.
async fn write_loop<W>(session: Arc<Session>, mut sink: W, mut outbound: mpsc::Receiver<Frame>)
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let closed = session.close_token();
    loop {
        let frame = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = sink.send(to_message(frame)).await {
            debug!(session_id = %session.id(), error = %e, "write failed, closing session");
            session.close();
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::sample_image::IMAGE_NOT_FOUND;
    use crate::session::handle::tests::test_session;
    use crate::session::handle::SessionState;
    use crate::session::timers::RenderFn;
    use crate::transport::websocket::upgrade;
    use herald_core::HeraldError;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;
    use tokio::time::{self, Instant};
    use tokio_tungstenite::WebSocketStream;

    type Client = WebSocketStream<DuplexStream>;

    const STATUS_JSON: &str = r#"{"topic":"status","payload":"Server is running"}"#;

    fn manager(sample_dir: &Path, max_sessions: usize) -> Arc<ConnectionManager> {
        let timing = Timing::default();
        Arc::new(ConnectionManager::new(
            Arc::new(HandlerRegistry::with_builtins(sample_dir, &timing)),
            Arc::new(SessionManager::new(max_sessions)),
            timing,
            ConnectionLimits {
                max_frame_size: 1024,
                outbound_queue: 64,
            },
        ))
    }

    async fn connect(manager: &Arc<ConnectionManager>) -> (Client, JoinHandle<HeraldResult<()>>) {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let manager = Arc::clone(manager);
        let server = tokio::spawn(async move {
            let conn = upgrade(server_io, addr).await?;
            manager.serve(conn).await
        });
        let (client, _) = tokio_tungstenite::client_async("ws://localhost/", client_io)
            .await
            .unwrap();
        (client, server)
    }

    /// Next data frame, or `None` once the server closes.
    async fn next_frame(client: &mut Client) -> Option<Frame> {
        loop {
            match client.next().await? {
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(msg) => {
                    if let Some(frame) = from_message(msg) {
                        return Some(frame);
                    }
                }
            }
        }
    }

    /// Next frame that is not a status push.
    async fn next_reply(client: &mut Client) -> Option<Frame> {
        loop {
            let frame = next_frame(client).await?;
            if frame != Frame::Text(STATUS_JSON.into()) {
                return Some(frame);
            }
        }
    }

    async fn send_text(client: &mut Client, text: &str) {
        client.send(Message::Text(text.into())).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn status_pushed_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, _server) = connect(&manager).await;

        let start = Instant::now();
        for n in 1..=3u64 {
            assert_eq!(next_frame(&mut client).await, Some(Frame::Text(STATUS_JSON.into())));
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_secs(5 * n));
            assert!(elapsed < Duration::from_secs(5 * n + 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, _server) = connect(&manager).await;

        send_text(&mut client, r#"{"topic":"repeat","payload":"hi"}"#).await;
        for n in 1..=10 {
            assert_eq!(
                next_reply(&mut client).await,
                Some(Frame::Text(format!("Message {n}: hi")))
            );
        }

        let more = time::timeout(Duration::from_secs(30), next_reply(&mut client)).await;
        assert!(more.is_err(), "unexpected frame after tenth repeat: {more:?}");
    }

    #[tokio::test]
    async fn unknown_and_missing_topics_echo() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, _server) = connect(&manager).await;

        send_text(&mut client, r#"{"topic":"nope","payload":"a"}"#).await;
        send_text(&mut client, r#"{"payload":"b"}"#).await;
        send_text(&mut client, r#"{"topic":"","payload":{"c":1}}"#).await;

        assert_eq!(next_reply(&mut client).await, Some(Frame::Text("Received: a".into())));
        assert_eq!(next_reply(&mut client).await, Some(Frame::Text("Received: b".into())));
        assert_eq!(
            next_reply(&mut client).await,
            Some(Frame::Text(r#"Received: {"c":1}"#.into()))
        );
    }

    #[tokio::test]
    async fn missing_image_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, _server) = connect(&manager).await;

        send_text(&mut client, r#"{"topic":"getSampleImage","payload":"missing.png"}"#).await;
        assert_eq!(
            next_reply(&mut client).await,
            Some(Frame::Text(IMAGE_NOT_FOUND.into()))
        );
    }

    #[tokio::test]
    async fn image_round_trip_is_binary() {
        let dir = tempfile::tempdir().unwrap();
        let image: Vec<u8> = (0..=255u8).collect();
        std::fs::write(dir.path().join("sample.png"), &image).unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, _server) = connect(&manager).await;

        send_text(&mut client, r#"{"topic":"getSampleImage","payload":"sample.png"}"#).await;
        assert_eq!(next_reply(&mut client).await, Some(Frame::Binary(image)));
    }

    #[tokio::test]
    async fn binary_scenario_routes_to_upload() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, _server) = connect(&manager).await;

        client
            .send(Message::Binary(vec![0xde, 0xad, 0xbe, 0xef].into()))
            .await
            .unwrap();
        send_text(&mut client, "not json at all").await;

        assert_eq!(
            next_reply(&mut client).await,
            Some(Frame::Text("Upload received: 4 bytes".into()))
        );
        assert_eq!(
            next_reply(&mut client).await,
            Some(Frame::Text("Upload received: 15 bytes".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_all_session_timers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, server) = connect(&manager).await;

        send_text(&mut client, r#"{"topic":"repeat","payload":"x"}"#).await;
        assert_eq!(next_reply(&mut client).await, Some(Frame::Text("Message 1: x".into())));
        assert_eq!(next_reply(&mut client).await, Some(Frame::Text("Message 2: x".into())));

        let info = manager.sessions().list().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].active_timers, 2);
        let session = manager.sessions().get(&info[0].id).await.unwrap();

        client.close(None).await.unwrap();
        server.await.unwrap().unwrap();

        assert!(!session.is_open());
        assert!(session.timers().is_empty());
        assert_eq!(manager.sessions().count().await, 0);
        // status timer is id 1, repeat is id 2
        for id in 1..=2 {
            assert!(session.timers().fire(id).is_none());
        }
        assert!(!session.send("late").await);
    }

    #[tokio::test]
    async fn oversized_frame_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, server) = connect(&manager).await;

        client
            .send(Message::Binary(vec![0u8; 4096].into()))
            .await
            .unwrap();
        assert_eq!(next_reply(&mut client).await, None);
        server.await.unwrap().unwrap();
        assert_eq!(manager.sessions().count().await, 0);
    }

    #[tokio::test]
    async fn session_limit_refuses_connection() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 1);
        let (_first, _first_server) = connect(&manager).await;
        // Wait for the first session to register.
        while manager.sessions().count().await == 0 {
            tokio::task::yield_now().await;
        }

        let (mut second, second_server) = connect(&manager).await;
        assert_eq!(next_frame(&mut second).await, None);
        let err = second_server.await.unwrap().unwrap_err();
        assert!(matches!(err, HeraldError::SessionLimit(1)));
    }

    #[tokio::test]
    async fn close_all_disconnects_clients() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, server) = connect(&manager).await;
        while manager.sessions().count().await == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(manager.sessions().close_all().await, 1);
        assert_eq!(next_frame(&mut client).await, None);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn non_object_json_routes_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, _server) = connect(&manager).await;

        send_text(&mut client, "42").await;
        send_text(&mut client, "null").await;

        assert_eq!(next_reply(&mut client).await, Some(Frame::Text("Received: null".into())));
        assert_eq!(
            next_reply(&mut client).await,
            Some(Frame::Text("Upload received: 4 bytes".into()))
        );
    }

    /// Sink whose every write fails as if the peer vanished.
    struct BrokenSink {
        attempts: Arc<AtomicUsize>,
    }

    impl Sink<Message> for BrokenSink {
        type Error = tungstenite::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(tungstenite::Error::ConnectionClosed)
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_error_closes_session_and_cancels_timers() {
        let (session, outbound) = test_session(8);
        let attempts = Arc::new(AtomicUsize::new(0));
        let sink = BrokenSink {
            attempts: Arc::clone(&attempts),
        };
        let writer = tokio::spawn(write_loop(Arc::clone(&session), sink, outbound));

        let render: RenderFn = Box::new(|n| Frame::Text(format!("tick {n}")));
        let timer = session
            .schedule_repeating("status", Duration::from_secs(5), None, render)
            .unwrap();
        assert_eq!(session.timers().len(), 1);

        assert!(session.send("hello").await);
        writer.await.unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.timers().is_empty());
        assert!(session.timers().fire(timer).is_none());
        assert!(!session.send("after").await);

        // The data write plus the best-effort close frame, nothing more.
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn replies_follow_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 8);
        let (mut client, _server) = connect(&manager).await;

        for n in 0..20 {
            send_text(&mut client, &format!(r#"{{"payload":"{n}"}}"#)).await;
        }
        for n in 0..20 {
            assert_eq!(
                next_reply(&mut client).await,
                Some(Frame::Text(format!("Received: {n}")))
            );
        }
    }
}
