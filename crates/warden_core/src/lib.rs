//! # Warden Core - Game Server Supervision
//!
//! Runs a Java game server as a child process and keeps track of whether its
//! remote console can be used. Everything here is infrastructure for a
//! control surface: the surface issues commands, the core reports back
//! through a single event channel.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Process Supervisor** - Start, stop and restart of the server process
//! * **Log Stream** - Drains server output and spots the console-ready marker
//! * **Readiness Probe** - Confirms the remote console answers
//! * **Polling Controller** - Roster and plugin-manager polling while ready
//! * **Remote Console Client** - One connection per command, with a typed error
//!   core and a string boundary
//! * **Role Directory** - Persistent player roles merged into the roster
//! * **Plugin Store / Backup Manager** - Local file operations on the server
//!   folder
//!
//! ### Session Flow
//!
//! 1. `start` spawns the process and opens a new [`SessionId`]
//! 2. Output lines are classified and forwarded as [`ControlEvent::Log`]
//! 3. The first readiness marker wakes the [`ReadinessProbe`]
//! 4. Once the console answers, readiness becomes `Ready` and polling begins
//! 5. `stop` resets readiness and cancels the session before the process goes
//!
//! Every background event carries its session, and [`SessionFilter`] drops
//! anything left over from an earlier run.
//!
//! ## Error Handling
//!
//! Supervisor and storage operations return [`LauncherError`]. Console
//! failures are [`TransportError`] internally and become the
//! [`ERROR_SENTINEL`](console::ERROR_SENTINEL) string at the
//! [`RemoteConsoleClient::run_command`] boundary.

pub mod backup;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod log_stream;
pub mod plugins;
pub mod polling;
pub mod probe;
pub mod readiness;
pub mod roles;
pub mod supervisor;

pub use backup::BackupManager;
pub use config::{
    plugin_identifier, LaunchConfig, PollSettings, ProbeSettings, RemoteConsoleConfig, StopTimings,
    SupervisorSettings,
};
pub use console::{ConsoleTransport, RconTransport, RemoteConsoleClient};
pub use error::{LauncherError, LauncherResult, TransportError, TransportResult};
pub use events::{ControlEvent, EventSender, LogLine, LogSeverity, Notice, NoticeLevel, SessionFilter, SessionId};
pub use plugins::{PluginDescriptor, PluginStore};
pub use polling::PollingController;
pub use probe::ReadinessProbe;
pub use readiness::{ReadinessSnapshot, ReadinessState, ReadinessTracker};
pub use roles::{Player, RoleDirectory};
pub use supervisor::{ProcessStatus, ProcessSupervisor, StopOutcome};
