//! Readiness state of the remote console for the current server session.
//!
//! The state lives in a `watch` channel so pollers can both read it
//! atomically and await changes. Writers go through [`ReadinessTracker`],
//! which enforces that transitions only move forward within a session and
//! that a writer holding a stale [`SessionId`] cannot touch a newer session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::events::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessState {
    NotStarted,
    WaitingForLog,
    ProbingConsole,
    Ready,
    Failed,
}

impl ReadinessState {
    fn rank(self) -> u8 {
        match self {
            ReadinessState::NotStarted => 0,
            ReadinessState::WaitingForLog => 1,
            ReadinessState::ProbingConsole => 2,
            ReadinessState::Ready | ReadinessState::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReadinessState::Ready | ReadinessState::Failed)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReadinessState::NotStarted => "not started",
            ReadinessState::WaitingForLog => "waiting for console listener",
            ReadinessState::ProbingConsole => "probing console",
            ReadinessState::Ready => "ready",
            ReadinessState::Failed => "unavailable",
        };
        f.write_str(label)
    }
}

/// Readiness together with the session it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    pub session: Option<SessionId>,
    pub state: ReadinessState,
}

impl ReadinessSnapshot {
    pub fn is_ready_for(&self, session: SessionId) -> bool {
        self.session == Some(session) && self.state == ReadinessState::Ready
    }
}

impl Default for ReadinessSnapshot {
    fn default() -> Self {
        Self {
            session: None,
            state: ReadinessState::NotStarted,
        }
    }
}

/// Shared, session-aware readiness cell.
#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    tx: Arc<watch::Sender<ReadinessSnapshot>>,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ReadinessSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessSnapshot> {
        self.tx.subscribe()
    }

    /// Opens `session` in `WaitingForLog`. Refused unless the previous session
    /// was reset first.
    pub fn begin(&self, session: SessionId) -> bool {
        self.tx.send_if_modified(|current| {
            if current.state != ReadinessState::NotStarted {
                return false;
            }
            *current = ReadinessSnapshot {
                session: Some(session),
                state: ReadinessState::WaitingForLog,
            };
            true
        })
    }

    /// Moves `session` forward to `next`. Backward moves, moves out of a
    /// terminal state and writes from another session are ignored.
    pub fn advance(&self, session: SessionId, next: ReadinessState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.session != Some(session) || next.rank() <= current.state.rank() {
                return false;
            }
            current.state = next;
            true
        })
    }

    /// Returns to `NotStarted`, handing back the session that was live.
    pub fn reset(&self) -> Option<SessionId> {
        let previous = self.tx.send_replace(ReadinessSnapshot::default());
        previous.session
    }
}

/// Waits until `session` is ready. Returns `false` once it is clear the
/// session will never get there.
pub async fn wait_until_ready(rx: &mut watch::Receiver<ReadinessSnapshot>, session: SessionId) -> bool {
    loop {
        {
            let snapshot = *rx.borrow_and_update();
            if snapshot.is_ready_for(session) {
                return true;
            }
            if snapshot.session != Some(session) || snapshot.state == ReadinessState::Failed {
                return false;
            }
        }
        if rx.changed().await.is_err() {
            return false;
        }
    }
}
