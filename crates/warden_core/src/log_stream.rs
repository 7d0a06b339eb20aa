//! Draining server output.
//!
//! Each output pipe of the child gets its own background task. Lines are
//! classified, forwarded to the control channel, and scanned for the marker
//! that says the remote console is listening. Both pipes of one session share
//! a single [`ReadinessLatch`], so the readiness event fires at most once.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{EventSender, LogSeverity, SessionId};

/// Substrings marking an error line. Matched case-insensitively.
pub const ERROR_MARKERS: &[&str] = &["ERROR", "SEVERE"];

/// Substrings marking a warning line. Matched case-insensitively.
pub const WARNING_MARKERS: &[&str] = &["WARN"];

/// Substrings announcing that the remote console listener is up. Matched
/// case-sensitively.
pub const READINESS_MARKERS: &[&str] = &["RCON running on", "Thread RCON Listener started"];

pub fn classify(line: &str) -> LogSeverity {
    let upper = line.to_uppercase();
    if ERROR_MARKERS.iter().any(|m| upper.contains(m)) {
        LogSeverity::Error
    } else if WARNING_MARKERS.iter().any(|m| upper.contains(m)) {
        LogSeverity::Warning
    } else {
        LogSeverity::Info
    }
}

pub fn is_readiness_marker(line: &str) -> bool {
    READINESS_MARKERS.iter().any(|m| line.contains(m))
}

/// One-shot readiness signal shared by every drain of a session.
#[derive(Debug, Clone)]
pub struct ReadinessLatch {
    sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ReadinessLatch {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Fires the latch. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                // The receiver may already be gone if the session was stopped.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// Line handler for one session's output.
#[derive(Debug, Clone)]
pub struct LogStream {
    session: SessionId,
    events: EventSender,
    latch: ReadinessLatch,
}

impl LogStream {
    pub fn new(session: SessionId, events: EventSender, latch: ReadinessLatch) -> Self {
        Self { session, events, latch }
    }

    /// Classifies and forwards one line. Blank lines are skipped.
    pub fn handle_line(&self, raw: &str) {
        let line = raw.trim_end();
        if line.is_empty() {
            return;
        }
        self.events.server_line(self.session, line, classify(line));

        if is_readiness_marker(line) && self.latch.trigger() {
            debug!("Console readiness marker seen for session {}", self.session);
        }
    }

    /// Reads `reader` to the end, returning the number of bytes consumed.
    ///
    /// Output is decoded lossily; servers on some platforms do not emit UTF-8.
    pub async fn drain<R>(&self, reader: R, origin: &'static str) -> u64
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        let mut total = 0u64;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    total += n as u64;
                    self.handle_line(&String::from_utf8_lossy(&buf));
                }
                Err(e) => {
                    warn!("Reading server {} failed for session {}: {}", origin, self.session, e);
                    break;
                }
            }
        }

        debug!("Server {} closed for session {} after {} bytes", origin, self.session, total);
        total
    }

    /// Runs [`drain`](Self::drain) on a background task.
    pub fn spawn<R>(self, reader: R, origin: &'static str) -> JoinHandle<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move { self.drain(reader, origin).await })
    }
}
