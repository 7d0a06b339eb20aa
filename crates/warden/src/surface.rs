//! Terminal control surface.
//!
//! A single task owns all presentation state. It reads commands from stdin
//! and consumes [`ControlEvent`]s from the core; anything slow (stopping,
//! console round trips, file work) runs on its own task and reports back
//! through the same event channel.

use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use warden_core::console::{is_error_response, response_indicates_success};
use warden_core::{
    plugin_identifier, BackupManager, ControlEvent, EventSender, LaunchConfig, LauncherError, LogSeverity,
    NoticeLevel, Player, PluginStore, ProcessSupervisor, ReadinessState, SessionFilter, StopOutcome,
};

use crate::commands::{parse_command, PluginAction, SurfaceCommand, HELP};
use crate::config::AppConfig;

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

fn paint(text: &str, color: &str) -> String {
    format!("{}{}{}", color, text, RESET)
}

/// Text for an event, or `None` if it only updates state.
pub fn render_event(event: &ControlEvent) -> Option<String> {
    match event {
        ControlEvent::Log { line, .. } => Some(if line.severity.is_error() {
            paint(&line.text, RED)
        } else {
            line.text.clone()
        }),
        ControlEvent::Notice { notice, .. } => {
            let text = format!("[{}] {}", notice.title, notice.message);
            Some(match notice.level {
                NoticeLevel::Info => paint(&text, GREEN),
                NoticeLevel::Warn => paint(&text, YELLOW),
                NoticeLevel::Error => paint(&text, RED),
            })
        }
        ControlEvent::Readiness { state, .. } => Some(format!("Console: {}", state)),
        ControlEvent::SessionStarted { .. }
        | ControlEvent::SessionEnded { .. }
        | ControlEvent::Roster { .. }
        | ControlEvent::PluginAvailability { .. } => None,
    }
}

pub struct ControlSurface {
    supervisor: ProcessSupervisor,
    launch: LaunchConfig,
    plugins: PluginStore,
    backups: BackupManager,
    events: EventSender,
    filter: SessionFilter,
    roster: Vec<Player>,
    plugin_manager: bool,
    readiness: ReadinessState,
}

impl ControlSurface {
    pub fn new(supervisor: ProcessSupervisor, config: &AppConfig, events: EventSender) -> Self {
        Self {
            supervisor,
            launch: config.launch_config(),
            plugins: config.plugin_store(),
            backups: config.backup_manager(),
            events,
            filter: SessionFilter::new(),
            roster: Vec::new(),
            plugin_manager: false,
            readiness: ReadinessState::NotStarted,
        }
    }

    /// Runs until `quit`, or until `shutdown` resolves. A running server is
    /// stopped before returning.
    pub async fn run<F>(mut self, mut events: UnboundedReceiver<ControlEvent>, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut signals_active = true;
        tokio::pin!(shutdown);

        println!("Type 'help' for commands.");
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event),
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => match parse_command(&line) {
                        Ok(Some(command)) => {
                            if !self.execute(command).await {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(message) => println!("{}", paint(&message, YELLOW)),
                    },
                    Ok(None) => {
                        info!("Input closed, waiting for a shutdown signal");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        stdin_open = false;
                    }
                },
                result = &mut shutdown, if signals_active => match result {
                    Ok(()) => break,
                    Err(e) => {
                        warn!("Signal handling unavailable: {}", e);
                        signals_active = false;
                    }
                },
            }
        }

        if self.supervisor.is_running() {
            println!("Stopping server...");
            let outcome = self.supervisor.stop().await;
            info!("Server shut down: {:?}", outcome);
        }
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
        }
        info!("👋 Control surface closed");
        Ok(())
    }

    pub fn handle_event(&mut self, event: ControlEvent) {
        if !self.filter.admit(&event) {
            debug!("Dropping event from stale session: {:?}", event.session());
            return;
        }

        match &event {
            ControlEvent::SessionStarted { .. } => {
                self.roster.clear();
                self.plugin_manager = false;
                self.readiness = ReadinessState::WaitingForLog;
            }
            ControlEvent::SessionEnded { .. } => {
                self.roster.clear();
                self.plugin_manager = false;
                self.readiness = ReadinessState::NotStarted;
            }
            ControlEvent::Readiness { state, .. } => self.readiness = *state,
            ControlEvent::Roster { players, .. } => self.roster = players.clone(),
            ControlEvent::PluginAvailability { available, .. } => {
                if *available != self.plugin_manager {
                    println!(
                        "Plugin manager {}",
                        if *available { "available" } else { "unavailable" }
                    );
                }
                self.plugin_manager = *available;
            }
            ControlEvent::Log { .. } | ControlEvent::Notice { .. } => {}
        }

        if let Some(text) = render_event(&event) {
            println!("{}", text);
        }
    }

    pub fn roster(&self) -> &[Player] {
        &self.roster
    }

    pub fn readiness(&self) -> ReadinessState {
        self.readiness
    }

    /// Executes one command. Returns `false` when the surface should exit.
    pub async fn execute(&mut self, command: SurfaceCommand) -> bool {
        match command {
            SurfaceCommand::Start => self.start_server().await,
            SurfaceCommand::Stop => {
                let supervisor = self.supervisor.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    if supervisor.stop().await == StopOutcome::NotRunning {
                        events.notify(None, NoticeLevel::Info, "Stop", "Server is not running");
                    }
                });
            }
            SurfaceCommand::Restart => {
                let supervisor = self.supervisor.clone();
                let launch = self.launch.clone();
                tokio::spawn(async move {
                    supervisor.restart(launch).await;
                });
            }
            SurfaceCommand::Send(text) => match self.supervisor.send_command(&text).await {
                Ok(()) | Err(LauncherError::CommandWrite(_)) => {}
                Err(e) => self.report(NoticeLevel::Warn, "Command not sent", e.to_string()),
            },
            SurfaceCommand::Players => self.print_players(),
            SurfaceCommand::Role { name, role } => match self.supervisor.roles().set_role(&name, &role).await {
                Ok(()) => println!("{} is now {}", name, role),
                Err(e) => self.report(NoticeLevel::Error, "Role not saved", e.to_string()),
            },
            SurfaceCommand::Plugins => self.list_plugins(),
            SurfaceCommand::Plugin { action, name } => self.plugin_command(action, name),
            SurfaceCommand::PluginInstall { path, overwrite } => self.install_plugin(&path, overwrite),
            SurfaceCommand::Backup => self.create_backup(),
            SurfaceCommand::Status => self.print_status(),
            SurfaceCommand::Help => println!("{}", HELP),
            SurfaceCommand::Quit => return false,
        }
        true
    }

    pub async fn start_server(&self) {
        if let Err(e) = self.supervisor.start(&self.launch).await {
            warn!("Start failed: {}", e);
            self.report(NoticeLevel::Error, "Start failed", e.to_string());
        }
    }

    fn report(&self, level: NoticeLevel, title: &str, message: String) {
        self.events.notify(None, level, title, message);
    }

    fn print_players(&self) {
        if self.roster.is_empty() {
            println!("No players online");
            return;
        }
        println!("{} player(s) online:", self.roster.len());
        for player in &self.roster {
            println!("  {:<16} {}", player.name, player.role);
        }
    }

    fn print_status(&self) {
        let status = self.supervisor.status();
        match status.session {
            Some(session) if status.stopping => {
                println!("Server stopping (session {}, pid {:?})", session, status.pid);
            }
            Some(session) => println!("Server running (session {}, pid {:?})", session, status.pid),
            None => println!("Server stopped"),
        }
        println!("Console: {}", self.readiness);
        println!(
            "Plugin manager: {}",
            if self.plugin_manager { "available" } else { "unavailable" }
        );
        println!("Players online: {}", self.roster.len());
    }

    fn list_plugins(&self) {
        let store = self.plugins.clone();
        let supervisor = self.supervisor.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match store.describe_all().await {
                Ok(plugins) if plugins.is_empty() => {
                    events.system_line(None, format!("No plugins in {}", store.dir().display()), LogSeverity::Info);
                }
                Ok(plugins) => {
                    for plugin in plugins {
                        let name = if plugin.name.is_empty() { "?" } else { plugin.name.as_str() };
                        events.system_line(
                            None,
                            format!(
                                "{} - {} {} by {}",
                                plugin.file_name,
                                name,
                                plugin.version,
                                if plugin.author.is_empty() { "unknown" } else { plugin.author.as_str() }
                            ),
                            LogSeverity::Info,
                        );
                    }
                }
                Err(e) => events.notify(None, NoticeLevel::Error, "Plugin list failed", e.to_string()),
            }
            supervisor.refresh_plugin_availability();
        });
    }

    fn plugin_command(&self, action: PluginAction, name: String) {
        let store = self.plugins.clone();
        let supervisor = self.supervisor.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let file_name = if name.ends_with(".jar") {
                name.clone()
            } else {
                format!("{}.jar", name)
            };
            let identifier = plugin_identifier(&file_name).to_string();
            let client = supervisor.client().clone();
            let console_ready = supervisor.readiness().state == ReadinessState::Ready;

            if action == PluginAction::Remove {
                if console_ready && client.check_plugin_manager_available().await {
                    let response = client.disable_plugin(&identifier).await;
                    debug!("Disable before remove: {}", response);
                }
                match store.remove(&file_name).await {
                    Ok(true) => events.notify(None, NoticeLevel::Info, "Plugin removed", file_name),
                    Ok(false) => events.notify(None, NoticeLevel::Warn, "Plugin not found", file_name),
                    Err(e) => events.notify(None, NoticeLevel::Error, "Plugin not removed", e.to_string()),
                }
                supervisor.refresh_plugin_availability();
                return;
            }

            if !console_ready {
                events.notify(None, NoticeLevel::Warn, "Console not ready", "Start the server and wait for the console");
                return;
            }
            if !client.check_plugin_manager_available().await {
                events.notify(
                    None,
                    NoticeLevel::Warn,
                    "Plugin manager unavailable",
                    "Install PlugMan to manage plugins without a restart",
                );
                return;
            }

            let (verb, response) = match action {
                PluginAction::Reload => ("reload", client.reload_plugin(&identifier).await),
                PluginAction::Enable => ("enable", client.enable_plugin(&identifier).await),
                PluginAction::Disable | PluginAction::Remove => ("disable", client.disable_plugin(&identifier).await),
            };

            if response_indicates_success(&response) {
                events.notify(None, NoticeLevel::Info, format!("Plugin {}", verb), response);
            } else if is_error_response(&response) {
                events.notify(None, NoticeLevel::Error, format!("Plugin {} failed", verb), response);
            } else {
                events.notify(None, NoticeLevel::Warn, format!("Plugin {} failed", verb), response);
            }
        });
    }

    fn install_plugin(&self, path: &Path, overwrite: bool) {
        let store = self.plugins.clone();
        let supervisor = self.supervisor.clone();
        let events = self.events.clone();
        let path = path.to_path_buf();
        tokio::spawn(async move {
            match store.install(&path, overwrite).await {
                Ok(target) => events.notify(
                    None,
                    NoticeLevel::Info,
                    "Plugin installed",
                    format!("{} (restart or load it to activate)", target.display()),
                ),
                Err(e) => events.notify(None, NoticeLevel::Error, "Plugin not installed", e.to_string()),
            }
            supervisor.refresh_plugin_availability();
        });
    }

    fn create_backup(&self) {
        let backups = self.backups.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            events.system_line(None, "Creating backup...", LogSeverity::Info);
            match backups.create_backup().await {
                Ok(path) => events.notify(None, NoticeLevel::Info, "Backup created", path.display().to_string()),
                Err(e) => events.notify(None, NoticeLevel::Error, "Backup failed", e.to_string()),
            }
        });
    }
}
