//! Readiness probe.
//!
//! Runs once per session. The log stream fires the readiness latch when the
//! server announces its console listener; the probe then confirms the console
//! actually answers before declaring the session ready.

use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProbeSettings;
use crate::console::client::ROSTER_COMMAND;
use crate::console::RemoteConsoleClient;
use crate::events::{ControlEvent, EventSender, NoticeLevel, SessionId};
use crate::readiness::{ReadinessState, ReadinessTracker};

pub struct ReadinessProbe {
    session: SessionId,
    client: Arc<RemoteConsoleClient>,
    readiness: ReadinessTracker,
    events: EventSender,
    settings: ProbeSettings,
}

impl ReadinessProbe {
    pub fn new(
        session: SessionId,
        client: Arc<RemoteConsoleClient>,
        readiness: ReadinessTracker,
        events: EventSender,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            session,
            client,
            readiness,
            events,
            settings,
        }
    }

    pub fn spawn(self, marker: oneshot::Receiver<()>) -> JoinHandle<ReadinessState> {
        tokio::spawn(self.run(marker))
    }

    /// Waits for the readiness marker, then probes the console. Returns the
    /// state the session was left in.
    pub async fn run(self, marker: oneshot::Receiver<()>) -> ReadinessState {
        if marker.await.is_err() {
            debug!("Session {} output ended before the console came up", self.session);
            return self.readiness.snapshot().state;
        }

        tokio::time::sleep(self.settings.initial_delay).await;

        if !self.client.has_password() {
            warn!("Console password is empty, skipping readiness probe");
            if self.transition(ReadinessState::Failed) {
                self.events.notify(
                    Some(self.session),
                    NoticeLevel::Warn,
                    "Console unavailable",
                    "Console password is missing; set a credential to enable the console",
                );
            }
            return ReadinessState::Failed;
        }

        if !self.transition(ReadinessState::ProbingConsole) {
            return self.readiness.snapshot().state;
        }

        let attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.client.try_command(ROSTER_COMMAND).await {
                Ok(_) => {
                    // A fresh console means the plugin set may differ from last time.
                    self.client.reset_cache();
                    if self.transition(ReadinessState::Ready) {
                        info!("🎮 Console ready after {} attempt(s)", attempt);
                        self.events.notify(
                            Some(self.session),
                            NoticeLevel::Info,
                            "Console connected",
                            format!("Connected to {}", self.client.config().address()),
                        );
                    }
                    return self.readiness.snapshot().state;
                }
                Err(e) => {
                    debug!("Console probe {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_interval).await;
                    }
                }
            }
        }

        warn!("Console did not answer after {} attempts", attempts);
        if self.transition(ReadinessState::Failed) {
            self.events.notify(
                Some(self.session),
                NoticeLevel::Error,
                "Console unavailable",
                format!("Connection to {} timed out", self.client.config().address()),
            );
        }
        ReadinessState::Failed
    }

    fn transition(&self, state: ReadinessState) -> bool {
        if !self.readiness.advance(self.session, state) {
            debug!("Session {} no longer live, dropping {} transition", self.session, state);
            return false;
        }
        self.events.send(ControlEvent::Readiness {
            session: self.session,
            state,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConsoleConfig;
    use crate::console::ConsoleTransport;
    use crate::error::{TransportError, TransportResult};
    use crate::events::{self, Notice};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then answers.
    struct FlakyTransport {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConsoleTransport for FlakyTransport {
        async fn execute(&self, _config: &RemoteConsoleConfig, _command: &str) -> TransportResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TransportError::Connect("127.0.0.1:25575".into(), "refused".into()))
            } else {
                Ok("There are 0 players online:".into())
            }
        }
    }

    fn settings() -> ProbeSettings {
        ProbeSettings {
            initial_delay: Duration::from_millis(5),
            retry_interval: Duration::from_millis(5),
            max_attempts: 4,
        }
    }

    fn client(password: &str, transport: Arc<FlakyTransport>) -> Arc<RemoteConsoleClient> {
        let config = RemoteConsoleConfig {
            password: password.to_string(),
            ..RemoteConsoleConfig::default()
        };
        Arc::new(RemoteConsoleClient::new(config, transport, Duration::from_millis(100)))
    }

    fn notices(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ControlEvent>) -> Vec<Notice> {
        let mut found = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ControlEvent::Notice { notice, .. } = event {
                found.push(notice);
            }
        }
        found
    }

    #[tokio::test]
    async fn test_probe_reaches_ready_after_retries() {
        let transport = Arc::new(FlakyTransport {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let (events, mut rx) = events::channel();
        let readiness = ReadinessTracker::new();
        let session = SessionId::new();
        readiness.begin(session);

        let probe = ReadinessProbe::new(session, client("pw", transport.clone()), readiness.clone(), events, settings());
        let (tx, marker) = oneshot::channel();
        tx.send(()).unwrap();

        assert_eq!(probe.run(marker).await, ReadinessState::Ready);
        assert!(readiness.snapshot().is_ready_for(session));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(notices(&mut rx)[0].level, NoticeLevel::Info);
    }

    #[tokio::test]
    async fn test_probe_gives_up_after_max_attempts() {
        let transport = Arc::new(FlakyTransport {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let (events, mut rx) = events::channel();
        let readiness = ReadinessTracker::new();
        let session = SessionId::new();
        readiness.begin(session);

        let probe = ReadinessProbe::new(session, client("pw", transport.clone()), readiness.clone(), events, settings());
        let (tx, marker) = oneshot::channel();
        tx.send(()).unwrap();

        assert_eq!(probe.run(marker).await, ReadinessState::Failed);
        assert_eq!(readiness.snapshot().state, ReadinessState::Failed);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);

        let notices = notices(&mut rx);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(notices[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_password_fails_without_traffic() {
        let transport = Arc::new(FlakyTransport {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let (events, mut rx) = events::channel();
        let readiness = ReadinessTracker::new();
        let session = SessionId::new();
        readiness.begin(session);

        let probe = ReadinessProbe::new(session, client("  ", transport.clone()), readiness.clone(), events, settings());
        let (tx, marker) = oneshot::channel();
        tx.send(()).unwrap();

        assert_eq!(probe.run(marker).await, ReadinessState::Failed);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(notices(&mut rx)[0].level, NoticeLevel::Warn);
    }

    #[tokio::test]
    async fn test_stale_session_cannot_become_ready() {
        let transport = Arc::new(FlakyTransport {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let (events, _rx) = events::channel();
        let readiness = ReadinessTracker::new();
        let old = SessionId::new();
        readiness.begin(old);
        readiness.reset();
        let new = SessionId::new();
        readiness.begin(new);

        let probe = ReadinessProbe::new(old, client("pw", transport.clone()), readiness.clone(), events, settings());
        let (tx, marker) = oneshot::channel();
        tx.send(()).unwrap();

        assert_eq!(probe.run(marker).await, ReadinessState::WaitingForLog);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(readiness.snapshot().session, Some(new));
    }

    #[tokio::test]
    async fn test_closed_marker_leaves_state_untouched() {
        let transport = Arc::new(FlakyTransport {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let (events, _rx) = events::channel();
        let readiness = ReadinessTracker::new();
        let session = SessionId::new();
        readiness.begin(session);

        let probe = ReadinessProbe::new(session, client("pw", transport), readiness.clone(), events, settings());
        let (tx, marker) = oneshot::channel::<()>();
        drop(tx);

        assert_eq!(probe.run(marker).await, ReadinessState::WaitingForLog);
    }
}
