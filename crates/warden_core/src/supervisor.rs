//! Server process supervision.
//!
//! [`ProcessSupervisor`] owns the one live server process. Starting it opens
//! a new session: output drains, the readiness probe and the pollers all run
//! as background tasks tagged with that session. Stopping resets readiness
//! and aborts the session's tasks before the process handle is let go, so
//! nothing that outlives the process can observe `Ready`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::{validate_launch_paths, LaunchConfig, StopTimings, SupervisorSettings};
use crate::console::RemoteConsoleClient;
use crate::error::{LauncherError, LauncherResult};
use crate::events::{ControlEvent, EventSender, LogSeverity, NoticeLevel, SessionId};
use crate::log_stream::{LogStream, ReadinessLatch};
use crate::polling::PollingController;
use crate::probe::ReadinessProbe;
use crate::readiness::{ReadinessSnapshot, ReadinessState, ReadinessTracker};
use crate::roles::RoleDirectory;

/// Written to the server's input to ask for a clean shutdown.
pub const STOP_COMMAND: &str = "stop";

/// How a [`ProcessSupervisor::stop`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The server exited after the stop command.
    Graceful { exit_code: Option<i32> },
    /// The server exited after the terminate signal.
    Terminated { exit_code: Option<i32> },
    /// The server had to be killed.
    Killed,
}

impl StopOutcome {
    fn exit_code(self) -> Option<i32> {
        match self {
            StopOutcome::Graceful { exit_code } | StopOutcome::Terminated { exit_code } => exit_code,
            StopOutcome::NotRunning | StopOutcome::Killed => None,
        }
    }
}

/// Lock-free view of the supervised process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Session of the live process, kept until shutdown has finished
    pub session: Option<SessionId>,
    pub pid: Option<u32>,
    /// A stop or reap is waiting for the process to exit
    pub stopping: bool,
}

/// The running child process of one session.
struct ServerProcessHandle {
    session: SessionId,
    child: Child,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
}

#[derive(Default)]
struct SupervisorState {
    handle: Option<ServerProcessHandle>,
    /// Set while a detached handle is being shut down
    stopping: bool,
    /// Probe and pollers of the live session
    tasks: Vec<AbortHandle>,
    pending_restart: Option<JoinHandle<()>>,
    /// Bumped by every stop and restart request
    stop_requests: u64,
}

impl SupervisorState {
    fn abort_session_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn cancel_pending_restart(&mut self) {
        if let Some(pending) = self.pending_restart.take() {
            debug!("Cancelling pending restart");
            pending.abort();
        }
    }
}

struct SupervisorInner {
    settings: SupervisorSettings,
    client: Arc<RemoteConsoleClient>,
    roles: Arc<RoleDirectory>,
    readiness: ReadinessTracker,
    events: EventSender,
    polling: PollingController,
    state: Mutex<SupervisorState>,
    status: watch::Sender<ProcessStatus>,
}

/// Supervises the server process. Cheap to clone; clones share one process.
///
/// The state lock is only held for bookkeeping. Waiting for the process to
/// exit happens outside it, so status queries, `send_command` and `start`
/// answer immediately even while a slow shutdown is in progress.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ProcessSupervisor {
    /// Creates a supervisor with no process.
    ///
    /// # Arguments
    ///
    /// * `settings` - Stop, probe and polling timings
    /// * `client` - Remote console client shared with the probe and pollers
    /// * `roles` - Role directory the roster poller merges names into
    /// * `events` - Sender every session reports through
    pub fn new(
        settings: SupervisorSettings,
        client: Arc<RemoteConsoleClient>,
        roles: Arc<RoleDirectory>,
        events: EventSender,
    ) -> Self {
        let readiness = ReadinessTracker::new();
        let polling = PollingController::new(
            client.clone(),
            roles.clone(),
            readiness.clone(),
            events.clone(),
            settings.poll,
        );
        let (status, _) = watch::channel(ProcessStatus::default());

        Self {
            inner: Arc::new(SupervisorInner {
                settings,
                client,
                roles,
                readiness,
                events,
                polling,
                state: Mutex::new(SupervisorState::default()),
                status,
            }),
        }
    }

    pub fn client(&self) -> &Arc<RemoteConsoleClient> {
        &self.inner.client
    }

    pub fn roles(&self) -> &Arc<RoleDirectory> {
        &self.inner.roles
    }

    pub fn readiness(&self) -> ReadinessSnapshot {
        self.inner.readiness.snapshot()
    }

    pub fn polling(&self) -> &PollingController {
        &self.inner.polling
    }

    /// Current process status. Never waits on the supervisor lock.
    pub fn status(&self) -> ProcessStatus {
        *self.inner.status.borrow()
    }

    /// Receiver that sees every process status change.
    pub fn subscribe_status(&self) -> watch::Receiver<ProcessStatus> {
        self.inner.status.subscribe()
    }

    /// Whether a process exists, including one that is shutting down.
    pub fn is_running(&self) -> bool {
        self.status().session.is_some()
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.status().session
    }

    pub fn pid(&self) -> Option<u32> {
        self.status().pid
    }

    /// Launches the server and opens a new session.
    ///
    /// Spawns the process with piped stdio, starts draining its output,
    /// and schedules the readiness probe and both pollers for the session.
    /// Returns as soon as the process is spawned; readiness is reported
    /// later through [`ControlEvent::Readiness`].
    ///
    /// # Arguments
    ///
    /// * `config` - Executable, server jar, working folder and JVM options
    ///
    /// # Returns
    ///
    /// The new session's id.
    ///
    /// # Errors
    ///
    /// * [`LauncherError::Validation`] - A configured path does not exist
    /// * [`LauncherError::AlreadyRunning`] - A process exists or is still
    ///   shutting down
    /// * [`LauncherError::ResourceLocked`] - Another instance holds the
    ///   world lock
    /// * [`LauncherError::Spawn`] - The process could not be created
    pub async fn start(&self, config: &LaunchConfig) -> LauncherResult<SessionId> {
        validate_launch_paths(config).map_err(LauncherError::Validation)?;

        let mut state = self.inner.state.lock().await;
        if state.handle.is_some() || state.stopping {
            return Err(LauncherError::AlreadyRunning);
        }
        check_lock(config)?;

        let command_line = config.command_line();
        info!("🚀 Launching server: {}", command_line);

        let mut child = Command::new(&config.executable)
            .args(config.command_args())
            .current_dir(&config.folder)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LauncherError::Spawn)?;

        let session = SessionId::new();
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if !self.inner.readiness.begin(session) {
            warn!("Readiness was not reset before session {}, resetting now", session);
            self.inner.readiness.reset();
            self.inner.readiness.begin(session);
        }

        let events = &self.inner.events;
        events.send(ControlEvent::SessionStarted {
            session,
            command_line: command_line.clone(),
        });
        events.send(ControlEvent::Readiness {
            session,
            state: ReadinessState::WaitingForLog,
        });

        let (latch, marker) = ReadinessLatch::new();
        let stream = LogStream::new(session, events.clone(), latch);
        let stderr_drain = stderr.map(|stderr| stream.clone().spawn(stderr, "stderr"));
        if let Some(stdout) = stdout {
            let supervisor = self.clone();
            tokio::spawn(async move {
                stream.drain(stdout, "stdout").await;
                // Forward every line before the session is reported ended.
                if let Some(drain) = stderr_drain {
                    let _ = drain.await;
                }
                supervisor.reap(session).await;
            });
        }

        let probe = ReadinessProbe::new(
            session,
            self.inner.client.clone(),
            self.inner.readiness.clone(),
            events.clone(),
            self.inner.settings.probe,
        );
        state.tasks.push(probe.spawn(marker).abort_handle());
        state
            .tasks
            .extend(self.inner.polling.start(session).iter().map(JoinHandle::abort_handle));

        state.handle = Some(ServerProcessHandle {
            session,
            child,
            stdin,
            pid,
        });
        self.inner.status.send_replace(ProcessStatus {
            session: Some(session),
            pid,
            stopping: false,
        });

        events.system_line(Some(session), format!("Server started: {}", command_line), LogSeverity::Info);
        info!("✅ Server started (session {}, pid {:?})", session, pid);
        Ok(session)
    }

    /// Stops the server and cancels any pending restart.
    ///
    /// Readiness is reset and the session's background tasks are aborted
    /// before anything else happens. Then the stop command is written and
    /// the process is given `graceful` to exit, a terminate signal and
    /// `terminate` more, and finally a kill.
    ///
    /// Only this call waits for the process. Other supervisor calls made
    /// meanwhile return at once; `start` reports
    /// [`LauncherError::AlreadyRunning`] until the shutdown has finished.
    ///
    /// # Returns
    ///
    /// How the process ended. [`StopOutcome::NotRunning`] if there was no
    /// process, or if another call was already shutting it down (this call
    /// then waits for that shutdown to finish).
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn example(supervisor: warden_core::ProcessSupervisor) {
    /// match supervisor.stop().await {
    ///     warden_core::StopOutcome::Graceful { exit_code } => println!("exited with {:?}", exit_code),
    ///     other => println!("stop ended as {:?}", other),
    /// }
    /// # }
    /// ```
    pub async fn stop(&self) -> StopOutcome {
        let handle = {
            let mut state = self.inner.state.lock().await;
            state.stop_requests += 1;
            state.cancel_pending_restart();
            self.detach(&mut state)
        };

        match handle {
            Some(handle) => self.shut_down_detached(handle).await,
            None => {
                self.wait_until_stopped().await;
                StopOutcome::NotRunning
            }
        }
    }

    /// Stops the server, then starts it again after the restart delay.
    ///
    /// The caller waits for the stop only; the delayed start runs on its own
    /// task and a failing start is reported as a notice. A `stop` or another
    /// `restart` issued before the delayed start runs cancels it.
    ///
    /// # Arguments
    ///
    /// * `config` - Launch configuration for the new process
    ///
    /// # Returns
    ///
    /// How the previous process ended.
    pub async fn restart(&self, config: LaunchConfig) -> StopOutcome {
        let (handle, request) = {
            let mut state = self.inner.state.lock().await;
            state.stop_requests += 1;
            state.cancel_pending_restart();
            (self.detach(&mut state), state.stop_requests)
        };

        let outcome = match handle {
            Some(handle) => self.shut_down_detached(handle).await,
            None => {
                self.wait_until_stopped().await;
                StopOutcome::NotRunning
            }
        };

        let mut state = self.inner.state.lock().await;
        if state.stop_requests != request {
            debug!("Restart superseded by a later stop request");
            return outcome;
        }

        let supervisor = self.clone();
        let delay = self.inner.settings.stop.restart_delay;
        state.pending_restart = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = supervisor.start(&config).await {
                error!("❌ Restart failed: {}", e);
                supervisor
                    .inner
                    .events
                    .notify(None, NoticeLevel::Error, "Restart failed", e.to_string());
                supervisor
                    .inner
                    .events
                    .system_line(None, format!("Restart failed: {}", e), LogSeverity::Error);
            }
        }));
        outcome
    }

    /// Writes one line to the server's input.
    ///
    /// # Errors
    ///
    /// * [`LauncherError::NotRunning`] - No process, a process that already
    ///   exited, or one that is shutting down
    /// * [`LauncherError::CommandWrite`] - The write failed; already reported
    ///   as a notice and an error line
    pub async fn send_command(&self, text: &str) -> LauncherResult<()> {
        let mut state = self.inner.state.lock().await;
        let handle = state.handle.as_mut().ok_or(LauncherError::NotRunning)?;
        if matches!(handle.child.try_wait(), Ok(Some(_))) {
            return Err(LauncherError::NotRunning);
        }
        let session = handle.session;
        let stdin = handle.stdin.as_mut().ok_or(LauncherError::NotRunning)?;

        if let Err(e) = write_line(stdin, text).await {
            warn!("Failed to send '{}' to server: {}", text, e);
            self.inner
                .events
                .notify(Some(session), NoticeLevel::Error, "Command failed", e.to_string());
            self.inner.events.system_line(
                Some(session),
                format!("Failed to send command '{}': {}", text, e),
                LogSeverity::Error,
            );
            return Err(LauncherError::CommandWrite(e));
        }
        debug!("Sent '{}' to server", text);
        Ok(())
    }

    /// Runs a plugin availability check for the live session right away.
    pub fn refresh_plugin_availability(&self) {
        let status = self.status();
        if let (Some(session), false) = (status.session, status.stopping) {
            self.inner.polling.refresh_plugin_availability_now(session);
        }
    }

    /// Takes the live process out of the state for shutdown. Readiness is
    /// reset and the session's tasks are aborted while the lock is held.
    fn detach(&self, state: &mut SupervisorState) -> Option<ServerProcessHandle> {
        let handle = state.handle.take()?;
        self.inner.readiness.reset();
        state.abort_session_tasks();
        state.stopping = true;
        self.inner.status.send_replace(ProcessStatus {
            session: Some(handle.session),
            pid: handle.pid,
            stopping: true,
        });
        Some(handle)
    }

    async fn shut_down_detached(&self, mut handle: ServerProcessHandle) -> StopOutcome {
        info!("🛑 Stopping server (session {})", handle.session);
        let outcome = shut_down(&mut handle, self.inner.settings.stop).await;
        self.finish_session(handle.session, outcome.exit_code()).await;

        let (summary, severity) = match outcome {
            StopOutcome::Graceful { .. } => ("Server stopped", LogSeverity::Info),
            StopOutcome::Terminated { .. } => ("Server terminated after not responding to stop", LogSeverity::Warning),
            _ => ("Server killed after not responding to terminate", LogSeverity::Warning),
        };
        self.inner.events.system_line(None, summary, severity);
        info!("{} ({:?})", summary, outcome);
        outcome
    }

    /// Clears the stopping flag and reports the session ended. Both happen
    /// under the lock so a new session always starts after the old one ends.
    async fn finish_session(&self, session: SessionId, exit_code: Option<i32>) {
        let mut state = self.inner.state.lock().await;
        state.stopping = false;
        self.inner.status.send_replace(ProcessStatus::default());
        self.inner.events.send(ControlEvent::SessionEnded { session, exit_code });
    }

    async fn wait_until_stopped(&self) {
        let mut status = self.inner.status.subscribe();
        let stopped = status.wait_for(|s| !s.stopping).await.is_ok();
        if !stopped {
            debug!("Status channel closed while waiting for shutdown");
        }
    }

    /// Cleans up after a process whose output closed on its own.
    async fn reap(&self, session: SessionId) {
        let handle = {
            let mut state = self.inner.state.lock().await;
            if state.handle.as_ref().map(|h| h.session) != Some(session) {
                return;
            }
            self.detach(&mut state)
        };
        let Some(mut handle) = handle else {
            return;
        };

        let exit_code = match wait_for_exit(&mut handle.child, self.inner.settings.stop.terminate).await {
            Some(exit_code) => exit_code,
            None => {
                warn!("Server closed its output but kept running, stopping it");
                shut_down(&mut handle, self.inner.settings.stop).await.exit_code()
            }
        };
        self.finish_session(session, exit_code).await;

        if exit_code == Some(0) {
            info!("Server exited");
            self.inner.events.system_line(None, "Server exited", LogSeverity::Info);
        } else {
            warn!("⚠️ Server exited unexpectedly with code {:?}", exit_code);
            let message = match exit_code {
                Some(code) => format!("Server exited with code {}", code),
                None => "Server exited abnormally".to_string(),
            };
            self.inner.events.system_line(None, &message, LogSeverity::Error);
            self.inner
                .events
                .notify(None, NoticeLevel::Error, "Server stopped", message);
        }
    }
}

/// Refuses to start when another instance holds the world lock.
fn check_lock(config: &LaunchConfig) -> LauncherResult<()> {
    let Some(path) = config.lock_path() else {
        return Ok(());
    };
    match std::fs::OpenOptions::new().append(true).open(&path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("Lock file {} is held: {}", path.display(), e);
            Err(LauncherError::ResourceLocked(path))
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    stdin.write_all(format!("{}\n", text).as_bytes()).await?;
    stdin.flush().await
}

async fn shut_down(handle: &mut ServerProcessHandle, timings: StopTimings) -> StopOutcome {
    if let Some(mut stdin) = handle.stdin.take() {
        if let Err(e) = write_line(&mut stdin, STOP_COMMAND).await {
            debug!("Could not deliver stop command: {}", e);
        }
        // stdin drops here and the server sees end of input.
    }
    if let Some(exit_code) = wait_for_exit(&mut handle.child, timings.graceful).await {
        return StopOutcome::Graceful { exit_code };
    }

    warn!("Server ignored the stop command for {:?}, terminating", timings.graceful);
    send_terminate(handle);
    if let Some(exit_code) = wait_for_exit(&mut handle.child, timings.terminate).await {
        return StopOutcome::Terminated { exit_code };
    }

    warn!("Server ignored terminate for {:?}, killing", timings.terminate);
    if let Err(e) = handle.child.kill().await {
        error!("Failed to kill server process: {}", e);
    }
    StopOutcome::Killed
}

/// `Some(exit code)` if the child exited within `limit`.
async fn wait_for_exit(child: &mut Child, limit: Duration) -> Option<Option<i32>> {
    match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) => Some(status.code()),
        Ok(Err(e)) => {
            warn!("Failed waiting for server process: {}", e);
            Some(None)
        }
        Err(_) => None,
    }
}

#[cfg(unix)]
fn send_terminate(handle: &mut ServerProcessHandle) {
    if let Some(pid) = handle.pid {
        // SAFETY: plain signal delivery to a child we spawned and have not reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(handle: &mut ServerProcessHandle) {
    if let Err(e) = handle.child.start_kill() {
        warn!("Failed to terminate server process: {}", e);
    }
}
