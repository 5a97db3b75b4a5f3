//! Per-session timer records.
//!
//! Every repeating or delayed callback bound to a session is an explicit
//! record in that session's [`TimerSet`]: its fire count, optional limit, and
//! the function that renders the frame for firing *n*. Cancelling a timer
//! removes its record, so a fire against a cancelled timer finds nothing and
//! has no effect.

use herald_core::Frame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Identifier of a timer within its session.
pub type TimerId = u64;

/// Renders the frame for the n-th firing (1-indexed).
pub type RenderFn = Box<dyn FnMut(u32) -> Frame + Send>;

struct TimerRecord {
    label: &'static str,
    fired: u32,
    limit: Option<u32>,
    render: RenderFn,
    token: CancellationToken,
}

/// One firing produced by [`TimerSet::fire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    /// Frame to send.
    pub frame: Frame,
    /// 1-indexed firing number.
    pub count: u32,
    /// Whether this was the final firing; the record is already gone.
    pub last: bool,
}

/// The timers owned by one session.
pub struct TimerSet {
    session_id: String,
    records: Mutex<HashMap<TimerId, TimerRecord>>,
    next_id: AtomicU64,
    /// Cancelled when the owning session closes. Every timer token is a child.
    root: CancellationToken,
}

impl TimerSet {
    pub fn new(session_id: impl Into<String>, root: CancellationToken) -> Self {
        Self {
            session_id: session_id.into(),
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            root,
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<TimerId, TimerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a timer record.
    ///
    /// Returns `None` once the session is closed or when `limit` is zero.
    pub fn insert(
        &self,
        label: &'static str,
        limit: Option<u32>,
        render: RenderFn,
    ) -> Option<(TimerId, CancellationToken)> {
        if limit == Some(0) {
            return None;
        }
        let mut records = self.records();
        // Checked under the lock so a concurrent cancel_all cannot miss us.
        if self.root.is_cancelled() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        records.insert(
            id,
            TimerRecord {
                label,
                fired: 0,
                limit,
                render,
                token: token.clone(),
            },
        );
        trace!(session_id = %self.session_id, timer_id = id, label, "timer registered");
        Some((id, token))
    }

    /// Advance a timer by one firing.
    ///
    /// Returns `None` if the timer was cancelled, completed, or never existed.
    pub fn fire(&self, id: TimerId) -> Option<Firing> {
        let mut records = self.records();
        if self.root.is_cancelled() {
            return None;
        }
        let record = records.get_mut(&id)?;
        record.fired += 1;
        let count = record.fired;
        let frame = (record.render)(count);
        let last = record.limit.is_some_and(|limit| count >= limit);
        if last {
            if let Some(done) = records.remove(&id) {
                done.token.cancel();
                trace!(session_id = %self.session_id, timer_id = id, label = done.label, "timer completed");
            }
        }
        Some(Firing { frame, count, last })
    }

    /// Cancel a single timer. Returns `false` if it was not active.
    #[cfg(test)]
    pub fn cancel(&self, id: TimerId) -> bool {
        match self.records().remove(&id) {
            Some(record) => {
                record.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer and return how many were active.
    ///
    /// Records are drained, so each timer is cancelled exactly once.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.records().drain().collect();
        for (_, record) in &drained {
            record.token.cancel();
        }
        drained.len()
    }

    #[cfg(test)]
    pub fn contains(&self, id: TimerId) -> bool {
        self.records().contains_key(&id)
    }

    /// Number of active timers.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire count of an active timer.
    #[cfg(test)]
    pub fn fired(&self, id: TimerId) -> Option<u32> {
        self.records().get(&id).map(|r| r.fired)
    }
}
