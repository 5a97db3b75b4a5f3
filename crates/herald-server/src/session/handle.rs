//! A single live connection as seen by the connection manager and handlers.

use super::timers::{RenderFn, TimerId, TimerSet};
use herald_core::Frame;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// Connection-start metadata, kept for diagnostics only.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Remote socket address.
    pub remote_addr: SocketAddr,
    /// Headers of the WebSocket upgrade request.
    pub headers: Vec<(String, String)>,
}

impl PeerInfo {
    #[cfg(test)]
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            headers: Vec::new(),
        }
    }
}

/// Server-side state of one connection.
///
/// Outbound frames go through a bounded queue drained by a single writer
/// task, so sends from handlers, timers, and the read loop never race on the
/// transport.
pub struct Session {
    id: String,
    peer: PeerInfo,
    state: Mutex<SessionState>,
    outbound: mpsc::Sender<Frame>,
    closed: CancellationToken,
    timers: TimerSet,
    created_at: Instant,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.peer.remote_addr)
            .field("state", &self.state())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session in the `Connecting` state.
    pub fn new(id: String, peer: PeerInfo, outbound: mpsc::Sender<Frame>) -> Arc<Self> {
        let closed = CancellationToken::new();
        let timers = TimerSet::new(id.clone(), closed.clone());
        Arc::new(Self {
            id,
            peer,
            state: Mutex::new(SessionState::Connecting),
            outbound,
            closed,
            timers,
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    /// Token cancelled when the session closes.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// `Connecting -> Open`. Returns `false` for any other starting state.
    pub fn open(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Connecting {
            *state = SessionState::Open;
            true
        } else {
            false
        }
    }

    /// Transition to `Closed`, cancelling every owned timer and task.
    ///
    /// Returns the number of timers cancelled, or `None` if the session was
    /// already closed.
    pub fn close(&self) -> Option<usize> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Closed {
                return None;
            }
            *state = SessionState::Closed;
        }
        self.closed.cancel();
        let cancelled = self.timers.cancel_all();
        debug!(session_id = %self.id, timers = cancelled, "session closed");
        Some(cancelled)
    }

    /// Queue a frame for this session's transport.
    ///
    /// Returns `false` (and drops the frame) if the session is not open or
    /// closes while waiting for queue space.
    pub async fn send(&self, frame: impl Into<Frame>) -> bool {
        if !self.is_open() {
            return false;
        }
        let frame = frame.into();
        tokio::select! {
            biased;
            () = self.closed.cancelled() => false,
            res = self.outbound.send(frame) => res.is_ok(),
        }
    }

    /// Start a session-owned repeating timer.
    ///
    /// The first firing happens one `period` after scheduling. With a `limit`
    /// the timer stops after that many firings. Returns `None` if the session
    /// is already closed or `limit` is zero.
    pub fn schedule_repeating(
        self: &Arc<Self>,
        label: &'static str,
        period: Duration,
        limit: Option<u32>,
        render: RenderFn,
    ) -> Option<TimerId> {
        let (id, token) = self.timers.insert(label, limit, render)?;
        let session = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(firing) = session.timers.fire(id) else { break };
                        trace!(session_id = %session.id, timer_id = id, n = firing.count, label, "timer fired");
                        if !session.send(firing.frame).await || firing.last {
                            break;
                        }
                    }
                }
            }
            trace!(session_id = %session.id, timer_id = id, label, "timer task finished");
        });

        Some(id)
    }

    /// Run deferred work bound to this session; it is dropped when the
    /// session closes.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.closed.child_token();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = fut => {}
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    pub(crate) fn test_session(capacity: usize) -> (Arc<Session>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 40000));
        let session = Session::new("test-session".into(), PeerInfo::new(addr), tx);
        assert!(session.open());
        (session, rx)
    }

    fn tick_render() -> RenderFn {
        Box::new(|n| Frame::Text(format!("tick {n}")))
    }

    #[test]
    fn state_machine() {
        let (tx, _rx) = mpsc::channel(1);
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
        let session = Session::new("s".into(), PeerInfo::new(addr), tx);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.open());
        assert!(!session.open());
        assert_eq!(session.close(), Some(0));
        assert_eq!(session.state(), SessionState::Closed);
        let debug = format!("{session:?}");
        assert!(debug.contains("Closed") && debug.contains("\"s\""), "{debug}");
        assert_eq!(session.close(), None);
        assert!(!session.open());
    }

    #[tokio::test]
    async fn send_requires_open() {
        let (session, mut rx) = test_session(4);
        assert!(session.send("a").await);
        assert_eq!(rx.recv().await, Some(Frame::Text("a".into())));
        session.close();
        assert!(!session.send("b").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_timer_sends_in_order_then_stops() {
        let (session, mut rx) = test_session(16);
        let id = session
            .schedule_repeating("t", Duration::from_secs(1), Some(3), tick_render())
            .unwrap();

        let start = time::Instant::now();
        for n in 1..=3 {
            assert_eq!(rx.recv().await, Some(Frame::Text(format!("tick {n}"))));
        }
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(!session.timers().contains(id));

        time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_timer_early() {
        let (session, mut rx) = test_session(16);
        let id = session
            .schedule_repeating("t", Duration::from_secs(1), Some(10), tick_render())
            .unwrap();

        for n in 1..=3 {
            assert_eq!(rx.recv().await, Some(Frame::Text(format!("tick {n}"))));
        }
        assert_eq!(session.close(), Some(1));

        time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
        assert!(session.timers().fire(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_after_close_is_refused() {
        let (session, _rx) = test_session(1);
        session.close();
        assert!(session
            .schedule_repeating("late", Duration::from_secs(1), None, tick_render())
            .is_none());
    }

    #[tokio::test]
    async fn spawned_work_is_dropped_on_close() {
        let (session, mut rx) = test_session(4);
        let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();
        let s = Arc::clone(&session);
        session.spawn(async move {
            let _ = go_rx.await;
            s.send("late").await;
        });
        session.close();
        let _ = go_tx.send(());
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
