//! Remote-console client.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use super::roster::parse_roster;
use super::transport::{ConsoleTransport, RconTransport};
use crate::config::RemoteConsoleConfig;
use crate::error::{TransportError, TransportResult};

/// Prefix of every response synthesized from a transport failure.
pub const ERROR_SENTINEL: &str = "[console error]";

pub const ROSTER_COMMAND: &str = "list";
pub const PLUGIN_MANAGER_PROBE: &str = "plugman help";
/// Present in the probe response when the plugin manager is installed.
pub const PLUGIN_MANAGER_MARKER: &str = "PlugMan";

/// Default bound on a single command round trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Whether a response was synthesized from a transport failure.
pub fn is_error_response(response: &str) -> bool {
    response.starts_with(ERROR_SENTINEL)
}

/// Case-insensitive `"success"` check used to judge plugin commands.
pub fn response_indicates_success(response: &str) -> bool {
    !is_error_response(response) && response.to_lowercase().contains("success")
}

/// Issues console commands, one connection per command.
///
/// Holds no socket between calls. The only state is the cached plugin
/// manager availability, which has to be reset whenever the server behind
/// the console may have changed.
///
/// Two result styles are offered. [`try_command`](Self::try_command) keeps
/// the typed [`TransportError`]; [`run_command`](Self::run_command) and the
/// helpers built on it fold failures into a string starting with
/// [`ERROR_SENTINEL`], which is what the control surface displays.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use warden_core::{RemoteConsoleClient, RemoteConsoleConfig};
///
/// # async fn example() {
/// let config = RemoteConsoleConfig {
///     password: "secret".to_string(),
///     ..RemoteConsoleConfig::default()
/// };
/// let client = RemoteConsoleClient::rcon(config, Duration::from_secs(3));
/// let players = client.get_online_players().await;
/// println!("{} online", players.len());
/// # }
/// ```
pub struct RemoteConsoleClient {
    config: RemoteConsoleConfig,
    transport: Arc<dyn ConsoleTransport>,
    timeout: Duration,
    plugin_manager: Mutex<Option<bool>>,
}

impl std::fmt::Debug for RemoteConsoleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConsoleClient")
            .field("address", &self.config.address())
            .field("timeout", &self.timeout)
            .field("plugin_manager", &self.cached_plugin_manager())
            .finish()
    }
}

impl RemoteConsoleClient {
    /// Creates a client over an arbitrary transport.
    ///
    /// # Arguments
    ///
    /// * `config` - Console address and password
    /// * `transport` - Carries one command per call
    /// * `timeout` - Bound on each command round trip, connection included
    pub fn new(config: RemoteConsoleConfig, transport: Arc<dyn ConsoleTransport>, timeout: Duration) -> Self {
        Self {
            config,
            transport,
            timeout,
            plugin_manager: Mutex::new(None),
        }
    }

    /// Client speaking RCON through [`RconTransport`].
    pub fn rcon(config: RemoteConsoleConfig, timeout: Duration) -> Self {
        Self::new(config, Arc::new(RconTransport::new()), timeout)
    }

    pub fn config(&self) -> &RemoteConsoleConfig {
        &self.config
    }

    pub fn has_password(&self) -> bool {
        self.config.has_password()
    }

    /// Sends one command and returns the typed outcome.
    ///
    /// # Errors
    ///
    /// * [`TransportError::MissingPassword`] - No password is configured; the
    ///   transport is never called
    /// * [`TransportError::Timeout`] - The round trip took longer than the
    ///   client's timeout
    /// * Any error the transport reports (connect, auth, protocol)
    pub async fn try_command(&self, command: &str) -> TransportResult<String> {
        if !self.has_password() {
            return Err(TransportError::MissingPassword);
        }

        match tokio::time::timeout(self.timeout, self.transport.execute(&self.config, command)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }

    /// Sends one command. Failures come back as a string starting with
    /// [`ERROR_SENTINEL`] instead of an error.
    pub async fn run_command(&self, command: &str) -> String {
        match self.try_command(command).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Console command '{}' failed: {}", command, e);
                format!("{} {}", ERROR_SENTINEL, e)
            }
        }
    }

    /// Names of the players currently online. Empty on any failure.
    pub async fn get_online_players(&self) -> Vec<String> {
        let response = self.run_command(ROSTER_COMMAND).await;
        if is_error_response(&response) {
            return Vec::new();
        }
        parse_roster(&response)
    }

    /// Whether a hot-reload plugin manager is installed on the server.
    ///
    /// The first answer obtained without a transport failure is cached until
    /// [`reset_cache`](Self::reset_cache).
    pub async fn check_plugin_manager_available(&self) -> bool {
        if let Some(cached) = self.cached_plugin_manager() {
            return cached;
        }

        match self.try_command(PLUGIN_MANAGER_PROBE).await {
            Ok(response) => {
                let available = response.contains(PLUGIN_MANAGER_MARKER);
                self.store_plugin_manager(Some(available));
                info!("Plugin manager {}", if available { "detected" } else { "not installed" });
                available
            }
            Err(e) => {
                debug!("Plugin manager check failed: {}", e);
                false
            }
        }
    }

    pub async fn reload_plugin(&self, plugin: &str) -> String {
        self.plugin_command("reload", plugin).await
    }

    pub async fn enable_plugin(&self, plugin: &str) -> String {
        self.plugin_command("enable", plugin).await
    }

    pub async fn disable_plugin(&self, plugin: &str) -> String {
        self.plugin_command("disable", plugin).await
    }

    /// Forgets the cached plugin manager availability.
    pub fn reset_cache(&self) {
        self.store_plugin_manager(None);
    }

    pub fn cached_plugin_manager(&self) -> Option<bool> {
        match self.plugin_manager.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn store_plugin_manager(&self, value: Option<bool>) {
        match self.plugin_manager.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    async fn plugin_command(&self, action: &str, plugin: &str) -> String {
        let response = self.run_command(&format!("plugman {} {}", action, plugin)).await;
        // Plugin set may have changed.
        self.reset_cache();
        response
    }
}
