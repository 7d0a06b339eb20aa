//! Runtime configuration types and defaults.
//!
//! These are the already-validated values the supervisor and its
//! collaborators run with. The TOML file format lives in the binary crate and
//! converts into these structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Trailing flag appended to every server command line.
pub const TRAILING_FLAG: &str = "nogui";

/// How to launch the server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Runtime executable (usually a `java` binary)
    pub executable: PathBuf,
    /// Server core archive passed after `-jar`
    pub core_path: PathBuf,
    /// Working directory of the server
    pub folder: PathBuf,
    /// Initial heap size in megabytes
    pub min_heap_mb: u32,
    /// Maximum heap size in megabytes
    pub max_heap_mb: u32,
    /// Extra arguments, split on whitespace when the command line is built
    pub extra_args: String,
    /// Sentinel file, relative to `folder`, that a running instance keeps open
    pub lock_file: Option<PathBuf>,
}

impl LaunchConfig {
    pub fn new(executable: impl Into<PathBuf>, core_path: impl Into<PathBuf>, folder: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            core_path: core_path.into(),
            folder: folder.into(),
            min_heap_mb: 1024,
            max_heap_mb: 2048,
            extra_args: String::new(),
            lock_file: Some(PathBuf::from("world").join("session.lock")),
        }
    }

    /// Arguments following the executable, in order.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("-Xms{}M", self.min_heap_mb),
            format!("-Xmx{}M", self.max_heap_mb),
            "-jar".to_string(),
            self.core_path.to_string_lossy().into_owned(),
        ];
        args.extend(self.extra_args.split_whitespace().map(str::to_string));
        args.push(TRAILING_FLAG.to_string());
        args
    }

    /// Human-readable command line, used in the "started" log line.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.executable.to_string_lossy().into_owned()];
        parts.extend(self.command_args());
        parts.join(" ")
    }

    /// Absolute location of the lock sentinel, if one is configured.
    pub fn lock_path(&self) -> Option<PathBuf> {
        self.lock_file.as_ref().map(|rel| self.folder.join(rel))
    }

    /// Plugin directory inside the server folder.
    pub fn plugins_dir(&self) -> PathBuf {
        self.folder.join("plugins")
    }
}

/// Connection parameters for the remote console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConsoleConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl RemoteConsoleConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_password(&self) -> bool {
        !self.password.trim().is_empty()
    }
}

impl Default for RemoteConsoleConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25575,
            password: String::new(),
        }
    }
}

/// Bounded waits used while stopping and restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTimings {
    /// Wait for a natural exit after the graceful command
    pub graceful: Duration,
    /// Wait after the terminate signal before killing
    pub terminate: Duration,
    /// Delay between stop and start on restart
    pub restart_delay: Duration,
}

impl Default for StopTimings {
    fn default() -> Self {
        Self {
            graceful: Duration::from_secs(10),
            terminate: Duration::from_secs(5),
            restart_delay: Duration::from_secs(2),
        }
    }
}

/// Retry policy for the readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Lets the console listener finish binding after the log marker
    pub initial_delay: Duration,
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            retry_interval: Duration::from_millis(500),
            max_attempts: 20,
        }
    }
}

/// Poll periods while the console is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub roster_interval: Duration,
    pub plugin_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            roster_interval: Duration::from_secs(3),
            plugin_interval: Duration::from_secs(10),
        }
    }
}

/// Everything the supervisor needs besides the launch parameters.
#[derive(Debug, Clone, Default)]
pub struct SupervisorSettings {
    pub stop: StopTimings,
    pub probe: ProbeSettings,
    pub poll: PollSettings,
}

/// Checks that every path the launch depends on exists on disk.
pub fn validate_launch_paths(config: &LaunchConfig) -> Result<(), String> {
    if !config.folder.is_dir() {
        return Err(format!("server folder does not exist: {}", config.folder.display()));
    }
    if !config.core_path.is_file() {
        return Err(format!("server core file does not exist: {}", config.core_path.display()));
    }
    if !config.executable.is_file() {
        return Err(format!("executable does not exist: {}", config.executable.display()));
    }
    if config.min_heap_mb > config.max_heap_mb {
        return Err(format!(
            "minimum heap ({}M) exceeds maximum heap ({}M)",
            config.min_heap_mb, config.max_heap_mb
        ));
    }
    Ok(())
}

/// Strips a trailing `.jar` to get the identifier the plugin manager expects.
pub fn plugin_identifier(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|_| file_name.ends_with(".jar"))
        .unwrap_or(file_name)
}
