//! Integration tests for the process supervisor
//!
//! These tests drive the supervisor end to end against a shell script that
//! behaves like a game server (prints a console-ready line, echoes input,
//! exits on `stop`) and a scripted console transport in place of RCON.

#![cfg(unix)]

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};
use warden_core::events;
use warden_core::{
    ConsoleTransport, ControlEvent, LaunchConfig, LauncherError, LogSeverity, PollSettings, ProbeSettings,
    ProcessSupervisor, ReadinessState, RemoteConsoleClient, RemoteConsoleConfig, RoleDirectory, SessionFilter,
    StopOutcome, StopTimings, SupervisorSettings, TransportError, TransportResult,
};

const WELL_BEHAVED: &str = r#"#!/bin/sh
echo "[12:00:00 INFO]: Starting minecraft server version 1.20.4"
echo "[12:00:01 WARN]: **** SERVER IS RUNNING IN OFFLINE/INSECURE MODE!"
echo "[12:00:02 INFO]: RCON running on 0.0.0.0:25575"
while read -r line; do
  case "$line" in
    stop) echo "[12:00:09 INFO]: Stopping server"; exit 0 ;;
    *) echo "[12:00:05 INFO]: got $line" ;;
  esac
done
exit 3
"#;

const CRASHING: &str = r#"#!/bin/sh
echo "[12:00:00 INFO]: Starting minecraft server version 1.20.4"
echo "[12:00:01 ERROR]: Encountered an unexpected exception" >&2
exit 7
"#;

const IGNORES_STOP: &str = "#!/bin/sh\nexec sleep 30\n";

const IGNORES_TERMINATE: &str = "#!/bin/sh\ntrap '' TERM\nexec sleep 30\n";

/// Console that answers every command, or refuses every connection.
struct ScriptedConsole {
    online: bool,
    calls: AtomicUsize,
}

impl ScriptedConsole {
    fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ConsoleTransport for ScriptedConsole {
    async fn execute(&self, config: &RemoteConsoleConfig, command: &str) -> TransportResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online {
            return Err(TransportError::Connect(config.address(), "connection refused".into()));
        }
        Ok(match command {
            "list" => "There are 2 of a max of 20 players online: Steve, alex".to_string(),
            "plugman help" => "--------------------- [ PlugMan ] ---------------------".to_string(),
            _ => format!("Unknown command: {}", command),
        })
    }
}

struct Harness {
    supervisor: ProcessSupervisor,
    events: UnboundedReceiver<ControlEvent>,
    console: Arc<ScriptedConsole>,
    dir: tempfile::TempDir,
}

/// Helper to build a supervisor with short timings around a fake server.
async fn harness(online: bool, graceful: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("server.jar"), b"PK").unwrap();

    let settings = SupervisorSettings {
        stop: StopTimings {
            graceful,
            terminate: Duration::from_millis(500),
            restart_delay: Duration::from_millis(100),
        },
        probe: ProbeSettings {
            initial_delay: Duration::from_millis(10),
            retry_interval: Duration::from_millis(10),
            max_attempts: 5,
        },
        poll: PollSettings {
            roster_interval: Duration::from_millis(50),
            plugin_interval: Duration::from_millis(50),
        },
    };

    let console = ScriptedConsole::new(online);
    let client = Arc::new(RemoteConsoleClient::new(
        RemoteConsoleConfig {
            password: "secret".to_string(),
            ..RemoteConsoleConfig::default()
        },
        console.clone(),
        Duration::from_millis(200),
    ));
    let roles = Arc::new(RoleDirectory::load(dir.path().join("player_roles.json")).await);
    let (sender, events) = events::channel();

    Harness {
        supervisor: ProcessSupervisor::new(settings, client, roles, sender),
        events,
        console,
        dir,
    }
}

fn write_server(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn launch_config(dir: &Path, executable: PathBuf) -> LaunchConfig {
    LaunchConfig::new(executable, dir.join("server.jar"), dir)
}

/// Starts the server, retrying while a freshly written script is still
/// reported busy by the kernel.
async fn start(supervisor: &ProcessSupervisor, config: &LaunchConfig) -> warden_core::SessionId {
    for _ in 0..10 {
        match supervisor.start(config).await {
            Err(LauncherError::Spawn(e)) if e.raw_os_error() == Some(26) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => return other.unwrap(),
        }
    }
    panic!("server script stayed busy");
}

/// Receives events until one matches, returning everything seen on the way.
async fn collect_until<F>(events: &mut UnboundedReceiver<ControlEvent>, mut done: F) -> Vec<ControlEvent>
where
    F: FnMut(&ControlEvent) -> bool,
{
    let mut seen = Vec::new();
    timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            let finished = done(&event);
            seen.push(event);
            if finished {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for event");
    seen
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_probe_poll_and_graceful_stop() {
    let mut h = harness(true, Duration::from_secs(5)).await;
    let exe = write_server(h.dir.path(), "server.sh", WELL_BEHAVED);
    let session = start(&h.supervisor, &launch_config(h.dir.path(), exe)).await;
    assert!(h.supervisor.is_running());

    let seen = collect_until(&mut h.events, |e| {
        matches!(e, ControlEvent::Roster { players, .. } if !players.is_empty())
    })
    .await;

    assert!(matches!(seen[0], ControlEvent::SessionStarted { session: s, .. } if s == session));
    assert!(seen.iter().any(|e| matches!(
        e,
        ControlEvent::Log { line, .. } if line.text.contains("OFFLINE") && line.severity == LogSeverity::Warning
    )));
    assert!(seen.iter().any(|e| matches!(
        e,
        ControlEvent::Readiness { state: ReadinessState::Ready, session: s } if *s == session
    )));
    assert!(h.supervisor.readiness().is_ready_for(session));

    if let Some(ControlEvent::Roster { players, .. }) = seen.last() {
        let names: Vec<_> = players.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alex", "Steve"]);
    }
    assert_eq!(h.supervisor.roles().get_role("Steve").await, "Player");

    h.supervisor.send_command("say hello").await.unwrap();
    collect_until(&mut h.events, |e| {
        matches!(e, ControlEvent::Log { line, .. } if line.text.contains("got say hello"))
    })
    .await;

    let outcome = h.supervisor.stop().await;
    assert_eq!(outcome, StopOutcome::Graceful { exit_code: Some(0) });
    assert!(!h.supervisor.is_running());
    assert_eq!(h.supervisor.readiness().state, ReadinessState::NotStarted);
    assert_eq!(h.supervisor.stop().await, StopOutcome::NotRunning);

    collect_until(&mut h.events, |e| {
        matches!(e, ControlEvent::SessionEnded { session: s, exit_code: Some(0) } if *s == session)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_start_is_rejected() {
    let h = harness(true, Duration::from_secs(5)).await;
    let exe = write_server(h.dir.path(), "server.sh", WELL_BEHAVED);
    let config = launch_config(h.dir.path(), exe);

    start(&h.supervisor, &config).await;
    assert!(matches!(
        h.supervisor.start(&config).await,
        Err(LauncherError::AlreadyRunning)
    ));
    h.supervisor.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_locked_world_prevents_start() {
    let h = harness(true, Duration::from_secs(5)).await;
    let exe = write_server(h.dir.path(), "server.sh", WELL_BEHAVED);
    let config = launch_config(h.dir.path(), exe);
    std::fs::create_dir_all(config.lock_path().unwrap()).unwrap();

    assert!(matches!(
        h.supervisor.start(&config).await,
        Err(LauncherError::ResourceLocked(_))
    ));
    assert!(!h.supervisor.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unresponsive_console_fails_readiness() {
    let mut h = harness(false, Duration::from_secs(5)).await;
    let exe = write_server(h.dir.path(), "server.sh", WELL_BEHAVED);
    let session = start(&h.supervisor, &launch_config(h.dir.path(), exe)).await;

    collect_until(&mut h.events, |e| {
        matches!(e, ControlEvent::Readiness { state: ReadinessState::Failed, session: s } if *s == session)
    })
    .await;

    // Five probe attempts, then nothing: pollers never reach the console.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.console.calls.load(Ordering::SeqCst), 5);
    h.supervisor.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_natural_exit_clears_session() {
    let mut h = harness(true, Duration::from_secs(5)).await;
    let exe = write_server(h.dir.path(), "crash.sh", CRASHING);
    let session = start(&h.supervisor, &launch_config(h.dir.path(), exe)).await;

    let seen = collect_until(&mut h.events, |e| matches!(e, ControlEvent::SessionEnded { .. })).await;
    assert!(matches!(
        seen.last(),
        Some(ControlEvent::SessionEnded { session: s, exit_code: Some(7) }) if *s == session
    ));
    assert!(seen.iter().any(|e| matches!(
        e,
        ControlEvent::Log { line, .. } if line.severity == LogSeverity::Error
    )));

    assert!(!h.supervisor.is_running());
    assert_eq!(h.supervisor.readiness().state, ReadinessState::NotStarted);
    assert!(matches!(
        h.supervisor.send_command("list").await,
        Err(LauncherError::NotRunning)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_escalates_to_terminate() {
    let h = harness(true, Duration::from_millis(300)).await;
    let exe = write_server(h.dir.path(), "stubborn.sh", IGNORES_STOP);
    start(&h.supervisor, &launch_config(h.dir.path(), exe)).await;

    assert!(matches!(h.supervisor.stop().await, StopOutcome::Terminated { .. }));
    assert!(!h.supervisor.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_escalates_to_kill() {
    let h = harness(true, Duration::from_millis(300)).await;
    let exe = write_server(h.dir.path(), "immortal.sh", IGNORES_TERMINATE);
    start(&h.supervisor, &launch_config(h.dir.path(), exe)).await;

    assert_eq!(h.supervisor.stop().await, StopOutcome::Killed);
    assert!(!h.supervisor.is_running());
    assert_eq!(h.supervisor.readiness().state, ReadinessState::NotStarted);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_drops_events_from_previous_session() {
    let mut h = harness(true, Duration::from_secs(5)).await;
    let exe = write_server(h.dir.path(), "server.sh", WELL_BEHAVED);
    let config = launch_config(h.dir.path(), exe);
    let first = start(&h.supervisor, &config).await;

    collect_until(&mut h.events, |e| {
        matches!(e, ControlEvent::Readiness { state: ReadinessState::Ready, .. })
    })
    .await;

    let outcome = h.supervisor.restart(config.clone()).await;
    assert!(matches!(outcome, StopOutcome::Graceful { .. }));

    let mut filter = SessionFilter::new();
    filter.admit(&ControlEvent::SessionStarted {
        session: first,
        command_line: String::new(),
    });

    let seen = collect_until(&mut h.events, |e| {
        matches!(e, ControlEvent::Readiness { state: ReadinessState::Ready, session } if *session != first)
    })
    .await;

    let second = h.supervisor.current_session().unwrap();
    assert_ne!(first, second);

    let mut second_started = false;
    for event in &seen {
        let admitted = filter.admit(event);
        if matches!(event, ControlEvent::SessionStarted { .. }) {
            second_started = true;
        }
        if second_started && admitted {
            assert_ne!(event.session(), Some(first), "stale event admitted: {:?}", event);
        }
    }
    assert!(second_started);

    // A straggler from the first run is dropped once the second has begun.
    assert!(!filter.admit(&ControlEvent::Roster {
        session: first,
        players: Vec::new(),
    }));
    h.supervisor.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_cancels_pending_restart() {
    let h = harness(true, Duration::from_secs(5)).await;
    let exe = write_server(h.dir.path(), "server.sh", WELL_BEHAVED);
    let config = launch_config(h.dir.path(), exe);
    start(&h.supervisor, &config).await;

    h.supervisor.restart(config).await;
    assert_eq!(h.supervisor.stop().await, StopOutcome::NotRunning);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!h.supervisor.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_supervisor_answers_during_slow_stop() {
    let h = harness(true, Duration::from_secs(3)).await;
    let exe = write_server(h.dir.path(), "stubborn.sh", IGNORES_STOP);
    let config = launch_config(h.dir.path(), exe);
    let session = start(&h.supervisor, &config).await;

    let stopping = {
        let supervisor = h.supervisor.clone();
        tokio::spawn(async move { supervisor.stop().await })
    };
    let mut status = h.supervisor.subscribe_status();
    timeout(Duration::from_secs(1), status.wait_for(|s| s.stopping))
        .await
        .expect("stop never began")
        .unwrap();

    let status = h.supervisor.status();
    assert_eq!(status.session, Some(session));
    assert!(status.stopping);
    assert!(h.supervisor.is_running());

    let quick = Duration::from_millis(100);
    let sent = timeout(quick, h.supervisor.send_command("say hi"))
        .await
        .expect("send_command waited for the stop");
    assert!(matches!(sent, Err(LauncherError::NotRunning)));

    let started = timeout(quick, h.supervisor.start(&config))
        .await
        .expect("start waited for the stop");
    assert!(matches!(started, Err(LauncherError::AlreadyRunning)));

    assert!(!stopping.is_finished());
    assert!(matches!(stopping.await.unwrap(), StopOutcome::Terminated { .. }));
    assert!(!h.supervisor.is_running());
    assert!(!h.supervisor.status().stopping);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_stop_waits_for_shutdown_in_progress() {
    let h = harness(true, Duration::from_millis(300)).await;
    let exe = write_server(h.dir.path(), "stubborn.sh", IGNORES_STOP);
    start(&h.supervisor, &launch_config(h.dir.path(), exe)).await;

    let first = {
        let supervisor = h.supervisor.clone();
        tokio::spawn(async move { supervisor.stop().await })
    };
    let mut status = h.supervisor.subscribe_status();
    status.wait_for(|s| s.stopping).await.unwrap();

    assert_eq!(h.supervisor.stop().await, StopOutcome::NotRunning);
    assert!(!h.supervisor.is_running());
    assert!(matches!(first.await.unwrap(), StopOutcome::Terminated { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_during_restart_shutdown_cancels_the_start() {
    let h = harness(true, Duration::from_millis(300)).await;
    let exe = write_server(h.dir.path(), "stubborn.sh", IGNORES_STOP);
    let config = launch_config(h.dir.path(), exe);
    start(&h.supervisor, &config).await;

    let restarting = {
        let supervisor = h.supervisor.clone();
        tokio::spawn(async move { supervisor.restart(config).await })
    };
    let mut status = h.supervisor.subscribe_status();
    status.wait_for(|s| s.stopping).await.unwrap();

    assert_eq!(h.supervisor.stop().await, StopOutcome::NotRunning);
    assert!(matches!(restarting.await.unwrap(), StopOutcome::Terminated { .. }));

    // Well past the restart delay, nothing came back.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!h.supervisor.is_running());
}
