//! Messages flowing from background tasks to the control surface.
//!
//! Background work never touches state owned by the control surface. It
//! enqueues a [`ControlEvent`] on an unbounded channel instead, tagged with the
//! [`SessionId`] of the server run that produced it so that anything arriving
//! from an earlier run can be recognised and dropped by [`SessionFilter`].

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::readiness::ReadinessState;
use crate::roles::Player;

/// Identifier of one start-to-stop lifetime of the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell runs apart in a terminal.
        let full = self.0.simple().to_string();
        write!(f, "{}", &full[..8])
    }
}

/// Severity assigned to a line of server output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    /// Whether the line should be highlighted as a problem.
    pub fn is_error(self) -> bool {
        !matches!(self, LogSeverity::Info)
    }
}

/// One line destined for the log view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub severity: LogSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    SessionStarted {
        session: SessionId,
        command_line: String,
    },
    SessionEnded {
        session: SessionId,
        exit_code: Option<i32>,
    },
    Log {
        session: Option<SessionId>,
        line: LogLine,
    },
    Readiness {
        session: SessionId,
        state: ReadinessState,
    },
    Roster {
        session: SessionId,
        players: Vec<Player>,
    },
    PluginAvailability {
        session: SessionId,
        available: bool,
    },
    Notice {
        session: Option<SessionId>,
        notice: Notice,
    },
}

impl ControlEvent {
    /// Session the event belongs to, `None` for launcher-wide events.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            ControlEvent::SessionStarted { session, .. }
            | ControlEvent::SessionEnded { session, .. }
            | ControlEvent::Readiness { session, .. }
            | ControlEvent::Roster { session, .. }
            | ControlEvent::PluginAvailability { session, .. } => Some(*session),
            ControlEvent::Log { session, .. } | ControlEvent::Notice { session, .. } => *session,
        }
    }
}

/// Cloneable producer side of the control channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ControlEvent>,
}

/// Creates the control channel.
pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<ControlEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    pub fn send(&self, event: ControlEvent) {
        if self.tx.send(event).is_err() {
            debug!("Control surface is gone, dropping event");
        }
    }

    /// Forwards a raw server output line.
    pub fn server_line(&self, session: SessionId, text: impl Into<String>, severity: LogSeverity) {
        self.send(ControlEvent::Log {
            session: Some(session),
            line: LogLine {
                text: text.into(),
                severity,
            },
        });
    }

    /// Emits a launcher-generated log line with a local timestamp prefix.
    pub fn system_line(&self, session: Option<SessionId>, text: impl AsRef<str>, severity: LogSeverity) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.send(ControlEvent::Log {
            session,
            line: LogLine {
                text: format!("[{}] {}", stamp, text.as_ref()),
                severity,
            },
        });
    }

    pub fn notify(
        &self,
        session: Option<SessionId>,
        level: NoticeLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.send(ControlEvent::Notice {
            session,
            notice: Notice {
                level,
                title: title.into(),
                message: message.into(),
            },
        });
    }
}

/// Drops events that belong to a session other than the current one.
#[derive(Debug, Default)]
pub struct SessionFilter {
    current: Option<SessionId>,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<SessionId> {
        self.current
    }

    /// Returns whether the event should reach the surface, tracking session
    /// boundaries as a side effect.
    pub fn admit(&mut self, event: &ControlEvent) -> bool {
        match event {
            ControlEvent::SessionStarted { session, .. } => {
                self.current = Some(*session);
                true
            }
            ControlEvent::SessionEnded { session, .. } => {
                if self.current == Some(*session) {
                    self.current = None;
                    true
                } else {
                    false
                }
            }
            other => match other.session() {
                None => true,
                Some(session) => self.current == Some(session),
            },
        }
    }
}
