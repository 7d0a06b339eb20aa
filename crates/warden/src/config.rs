//! Configuration management for the launcher.
//!
//! Loads the TOML configuration file, validates it, and converts it into the
//! runtime types of `warden_core`.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use warden_core::backup::DEFAULT_MAX_BACKUPS;
use warden_core::{
    BackupManager, LaunchConfig, PluginStore, PollSettings, ProbeSettings, RemoteConsoleConfig, StopTimings,
    SupervisorSettings,
};

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub console: ConsoleSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// How to launch the game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Java executable; a bare name is looked up on `PATH`
    pub executable: String,
    /// Server core archive
    pub core_path: String,
    /// Working directory of the server
    pub folder: String,
    pub min_heap_mb: u32,
    pub max_heap_mb: u32,
    /// Extra arguments, split on whitespace
    pub extra_args: String,
    /// Lock sentinel relative to `folder`; empty disables the check
    pub lock_file: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            executable: "java".to_string(),
            core_path: "server/server.jar".to_string(),
            folder: "server".to_string(),
            min_heap_mb: 1024,
            max_heap_mb: 2048,
            extra_args: String::new(),
            lock_file: "world/session.lock".to_string(),
        }
    }
}

/// Remote console connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub command_timeout_ms: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25575,
            password: String::new(),
            command_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub graceful_stop_secs: u64,
    pub terminate_wait_secs: u64,
    pub restart_delay_secs: u64,
    pub probe_initial_delay_ms: u64,
    pub probe_retry_ms: u64,
    pub probe_max_attempts: u32,
    pub roster_interval_ms: u64,
    pub plugin_interval_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            graceful_stop_secs: 10,
            terminate_wait_secs: 5,
            restart_delay_secs: 2,
            probe_initial_delay_ms: 1000,
            probe_retry_ms: 500,
            probe_max_attempts: 20,
            roster_interval_ms: 3000,
            plugin_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Role directory file
    pub roles_file: String,
    /// Overrides `<server folder>/plugins`
    pub plugins_dir: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            roles_file: "player_roles.json".to_string(),
            plugins_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// World folder, relative to the server folder unless absolute
    pub world: String,
    /// Where archives are written
    pub directory: String,
    pub max_backups: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            world: "world".to_string(),
            directory: "backups".to_string(),
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the defaults there first
    /// if the file does not exist.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            default_config.save_to_file(path).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub async fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let toml_content = toml::to_string_pretty(self).context("Failed to encode configuration")?;
        tokio::fs::write(path, toml_content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Checks values for consistency. Paths are checked on start, not here.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.core_path.trim().is_empty() {
            return Err("Server core path cannot be empty".to_string());
        }
        if self.server.folder.trim().is_empty() {
            return Err("Server folder cannot be empty".to_string());
        }
        if self.server.min_heap_mb == 0 || self.server.min_heap_mb > self.server.max_heap_mb {
            return Err(format!(
                "Invalid heap sizes: min {}M, max {}M",
                self.server.min_heap_mb, self.server.max_heap_mb
            ));
        }

        if self.console.port == 0 {
            return Err("Console port cannot be 0".to_string());
        }
        if self.console.command_timeout_ms == 0 {
            return Err("Console command timeout must be positive".to_string());
        }

        if self.timing.probe_max_attempts == 0 {
            return Err("Probe attempts must be at least 1".to_string());
        }
        if self.timing.roster_interval_ms == 0 || self.timing.plugin_interval_ms == 0 {
            return Err("Poll intervals must be positive".to_string());
        }

        if self.storage.roles_file.trim().is_empty() {
            return Err("Roles file cannot be empty".to_string());
        }
        if self.backup.max_backups == 0 {
            return Err("Backups to keep must be at least 1".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    pub fn launch_config(&self) -> LaunchConfig {
        let server = &self.server;
        let mut launch = LaunchConfig::new(
            resolve_executable(&server.executable),
            &server.core_path,
            &server.folder,
        );
        launch.min_heap_mb = server.min_heap_mb;
        launch.max_heap_mb = server.max_heap_mb;
        launch.extra_args = server.extra_args.clone();
        launch.lock_file = Some(server.lock_file.trim())
            .filter(|lock| !lock.is_empty())
            .map(PathBuf::from);
        launch
    }

    pub fn console_config(&self) -> RemoteConsoleConfig {
        RemoteConsoleConfig {
            host: self.console.host.clone(),
            port: self.console.port,
            password: self.console.password.clone(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.console.command_timeout_ms)
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        let t = &self.timing;
        SupervisorSettings {
            stop: StopTimings {
                graceful: Duration::from_secs(t.graceful_stop_secs),
                terminate: Duration::from_secs(t.terminate_wait_secs),
                restart_delay: Duration::from_secs(t.restart_delay_secs),
            },
            probe: ProbeSettings {
                initial_delay: Duration::from_millis(t.probe_initial_delay_ms),
                retry_interval: Duration::from_millis(t.probe_retry_ms),
                max_attempts: t.probe_max_attempts,
            },
            poll: PollSettings {
                roster_interval: Duration::from_millis(t.roster_interval_ms),
                plugin_interval: Duration::from_millis(t.plugin_interval_ms),
            },
        }
    }

    pub fn roles_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.roles_file)
    }

    pub fn plugin_store(&self) -> PluginStore {
        match &self.storage.plugins_dir {
            Some(dir) => PluginStore::new(dir),
            None => PluginStore::new(self.launch_config().plugins_dir()),
        }
    }

    pub fn backup_manager(&self) -> BackupManager {
        let world = Path::new(&self.backup.world);
        let world = if world.is_absolute() {
            world.to_path_buf()
        } else {
            Path::new(&self.server.folder).join(world)
        };
        BackupManager::new(world, &self.backup.directory, self.backup.max_backups)
    }
}

/// Looks a bare command name up on `PATH`. Anything containing a path
/// separator, or not found, is returned unchanged.
fn resolve_executable(name: &str) -> PathBuf {
    let candidate = Path::new(name);
    if candidate.components().count() != 1 {
        return candidate.to_path_buf();
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .flat_map(|dir| executable_names(name).into_iter().map(move |n| dir.join(n)))
                .find(|path| path.is_file())
        })
        .unwrap_or_else(|| candidate.to_path_buf())
}

fn executable_names(name: &str) -> Vec<String> {
    if cfg!(windows) && Path::new(name).extension().is_none() {
        vec![format!("{}.exe", name), name.to_string()]
    } else {
        vec![name.to_string()]
    }
}
