//! Periodic roster and plugin-availability polling.
//!
//! Both loops are started per session, sleep until the session is ready and
//! check readiness again on every tick. A tick that finds the session not
//! ready publishes an empty roster or disabled availability without touching
//! the console. Roster fetches are single-flight: a tick that finds the
//! previous fetch still running aborts it and starts over.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::PollSettings;
use crate::console::RemoteConsoleClient;
use crate::events::{ControlEvent, EventSender, SessionId};
use crate::readiness::{wait_until_ready, ReadinessTracker};
use crate::roles::{Player, RoleDirectory};

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Roster and plugin-availability pollers for the live session.
///
/// Cloning shares the client, role directory and readiness tracker; each
/// [`start`](Self::start) call spawns an independent pair of loops.
#[derive(Clone)]
pub struct PollingController {
    client: Arc<RemoteConsoleClient>,
    roles: Arc<RoleDirectory>,
    readiness: ReadinessTracker,
    events: EventSender,
    settings: PollSettings,
}

impl PollingController {
    pub fn new(
        client: Arc<RemoteConsoleClient>,
        roles: Arc<RoleDirectory>,
        readiness: ReadinessTracker,
        events: EventSender,
        settings: PollSettings,
    ) -> Self {
        Self {
            client,
            roles,
            readiness,
            events,
            settings,
        }
    }

    /// Spawns both loops for `session`.
    ///
    /// The loops wait until readiness reaches `Ready` for this session, then
    /// tick at the configured intervals. If readiness ends in `Failed` or is
    /// reset first, they publish an empty roster and no plugin manager, then
    /// exit without ever contacting the console.
    ///
    /// # Arguments
    ///
    /// * `session` - Session whose readiness gates the loops
    ///
    /// # Returns
    ///
    /// The roster and plugin loop handles. Aborting them stops the loops,
    /// including any roster fetch in flight.
    pub fn start(&self, session: SessionId) -> Vec<JoinHandle<()>> {
        debug!("Starting pollers for session {}", session);
        vec![
            tokio::spawn(self.clone().roster_loop(session)),
            tokio::spawn(self.clone().plugin_loop(session)),
        ]
    }

    /// One roster tick: fetch names, merge them into the role directory and
    /// publish the sorted roster.
    pub async fn tick_roster_once(&self, session: SessionId) -> Vec<Player> {
        if !self.readiness.snapshot().is_ready_for(session) {
            self.publish_roster(session, Vec::new());
            return Vec::new();
        }

        let names = self.client.get_online_players().await;
        if let Err(e) = self.roles.merge_observed(&names).await {
            warn!("Failed to record new players: {}", e);
        }
        let players = self.roles.players_for(&names).await;
        self.publish_roster(session, players.clone());
        players
    }

    /// One availability tick.
    pub async fn tick_plugins_once(&self, session: SessionId) -> bool {
        let available = if self.readiness.snapshot().is_ready_for(session) {
            self.client.check_plugin_manager_available().await
        } else {
            false
        };
        self.events.send(ControlEvent::PluginAvailability { session, available });
        available
    }

    /// Runs an availability tick right away, outside the regular schedule.
    pub fn refresh_plugin_availability_now(&self, session: SessionId) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            controller.tick_plugins_once(session).await;
        })
    }

    async fn roster_loop(self, session: SessionId) {
        if !self.await_ready(session).await {
            self.publish_roster(session, Vec::new());
            return;
        }

        let mut in_flight: Option<AbortOnDrop> = None;
        let mut ticker = interval(self.settings.roster_interval);
        loop {
            ticker.tick().await;
            if let Some(previous) = in_flight.take() {
                if !previous.0.is_finished() {
                    debug!("Previous roster fetch still running, restarting it");
                }
            }
            let controller = self.clone();
            in_flight = Some(AbortOnDrop(tokio::spawn(async move {
                controller.tick_roster_once(session).await;
            })));
        }
    }

    async fn plugin_loop(self, session: SessionId) {
        if !self.await_ready(session).await {
            self.events.send(ControlEvent::PluginAvailability {
                session,
                available: false,
            });
            return;
        }

        let mut ticker = interval(self.settings.plugin_interval);
        loop {
            ticker.tick().await;
            self.tick_plugins_once(session).await;
        }
    }

    async fn await_ready(&self, session: SessionId) -> bool {
        let mut rx = self.readiness.subscribe();
        wait_until_ready(&mut rx, session).await
    }

    fn publish_roster(&self, session: SessionId, players: Vec<Player>) {
        self.events.send(ControlEvent::Roster { session, players });
    }
}

fn interval(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
