#![cfg(unix)]

mod common;

use appwarden_cli::error::StartupError;
use appwarden_cli::gui::GuiShell;
use appwarden_cli::managed_process::Role;
use appwarden_cli::procs::ProcessTreeTerminator;
use appwarden_cli::ready_state::ReadyState;
use appwarden_cli::shutdown::{ShutdownCoordinator, ShutdownReport};
use appwarden_cli::state_file::SessionFile;
use appwarden_cli::supervisor::ProcessSupervisor;
use common::{
    BROKEN_DAEMON, FAKE_DAEMON, FLAKY_DAEMON, HELPER_SPAWNING_DAEMON, RecordingShell,
    RequestRecorder, TestEnv, pid_alive, wait_until,
};
use std::sync::{Arc, Mutex};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_dev_startup_and_shutdown() {
    let env = TestEnv::new();
    let settings = Arc::new(env.dev_settings(FAKE_DAEMON, (39301, 39310), (39311, 39320)));
    let supervisor = Arc::new(ProcessSupervisor::new(settings.clone(), ProcessTreeTerminator::platform()));
    let gui = Arc::new(RecordingShell::default());

    let ports = supervisor.start(gui.as_ref()).await.unwrap();
    assert_eq!(gui.presented(), Some(ports));
    assert!((39301..=39310).contains(&ports.daemon));
    assert!((39311..=39320).contains(&ports.frontend));

    let args = env.read_home_file("daemon.args");
    assert!(args.contains(&format!("--port={}", ports.daemon)), "{args}");
    assert!(args.contains(&format!("--home={}", env.home().display())), "{args}");
    let frontend_env = env.read_home_file("frontend.env");
    assert_eq!(
        frontend_env.trim(),
        format!("PORT={} DAEMON={}", ports.frontend, ports.daemon)
    );

    let daemon = supervisor.process(Role::Daemon).await.unwrap();
    let frontend = supervisor.process(Role::Frontend).await.unwrap();
    assert_eq!(daemon.ready_state(), ReadyState::Ready);
    assert_eq!(frontend.ready_state(), ReadyState::Ready);

    let session = SessionFile::read(settings.session_file()).unwrap().unwrap();
    assert_eq!(session.get(Role::Daemon).unwrap().pid, Some(daemon.pid));
    assert_eq!(session.get(Role::Frontend).unwrap().port, ports.frontend);

    let logged = wait_until(Duration::from_secs(2), || {
        std::fs::read_to_string(&daemon.log_path)
            .unwrap_or_default()
            .contains("Uvicorn running on")
    });
    assert!(logged, "daemon output should reach its log file");

    let shell: Arc<dyn GuiShell> = gui.clone();
    let coordinator = ShutdownCoordinator::for_supervisor(supervisor.clone(), shell);
    let report = coordinator.shutdown().await;
    assert!(!report.has_fatal_failure(), "{report:?}");
    assert_eq!(gui.torn_down.load(Ordering::SeqCst), 1);

    assert!(wait_until(Duration::from_secs(5), || !pid_alive(daemon.pid)));
    assert!(wait_until(Duration::from_secs(5), || !pid_alive(frontend.pid)));
    assert!(supervisor.process(Role::Daemon).await.is_none());
    assert!(supervisor.process(Role::Frontend).await.is_none());
    assert!(!settings.session_file().exists());
}

#[tokio::test]
async fn test_daemon_bind_failure_retries_on_another_port() {
    let env = TestEnv::new();
    let settings = Arc::new(env.dev_settings(FLAKY_DAEMON, (39321, 39330), (39331, 39340)));
    let supervisor = Arc::new(ProcessSupervisor::new(settings, ProcessTreeTerminator::platform()));
    let gui = RecordingShell::default();

    let ports = supervisor.start(&gui).await.unwrap();

    let failed_port: u16 = env.read_home_file("failed_once").trim().parse().unwrap();
    assert_ne!(ports.daemon, failed_port);
    assert!(gui.fatal().is_empty());

    supervisor.begin_shutdown().await;
    for role in [Role::Daemon, Role::Frontend] {
        if let Some(process) = supervisor.forget(role).await {
            process.terminate(Duration::from_secs(1)).await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_second_daemon_failure_is_fatal() {
    let env = TestEnv::new();
    let settings = Arc::new(env.dev_settings(BROKEN_DAEMON, (39341, 39350), (39351, 39360)));
    let supervisor = ProcessSupervisor::new(settings, ProcessTreeTerminator::platform());
    let gui = RecordingShell::default();

    let err = supervisor.start(&gui).await.unwrap_err();
    match &err {
        StartupError::Daemon { attempts, .. } => assert_eq!(*attempts, 2),
        e => panic!("expected a daemon startup error, got {e:?}"),
    }
    assert!(supervisor.process(Role::Daemon).await.is_none());
    assert!(supervisor.process(Role::Frontend).await.is_none());
    assert_eq!(gui.presented(), None);
}

#[tokio::test]
async fn test_no_spawn_after_shutdown_begins() {
    let env = TestEnv::new();
    let settings = Arc::new(env.dev_settings(FAKE_DAEMON, (39361, 39370), (39371, 39380)));
    let supervisor = ProcessSupervisor::new(settings, ProcessTreeTerminator::platform());
    supervisor.begin_shutdown().await;

    let err = supervisor
        .start(&RecordingShell::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StartupError::ShuttingDown { .. }), "{err:?}");
    assert!(env.read_home_file("daemon.args").is_empty());
}

#[tokio::test]
async fn test_ready_timeout_fails_startup() {
    let env = TestEnv::new();
    let mut settings = env.dev_settings("exec sleep 30", (39381, 39390), (39391, 39399));
    settings.daemon.ready_timeout = "300ms".to_string();
    let supervisor = ProcessSupervisor::new(Arc::new(settings), ProcessTreeTerminator::platform());

    let err = supervisor
        .start(&RecordingShell::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StartupError::Daemon { .. }), "{err:?}");
    assert!(supervisor.process(Role::Daemon).await.is_none());
}

async fn shut_down(supervisor: &Arc<ProcessSupervisor>) -> Arc<ShutdownReport> {
    let shell: Arc<dyn GuiShell> = Arc::new(RecordingShell::default());
    ShutdownCoordinator::for_supervisor(supervisor.clone(), shell)
        .shutdown()
        .await
}

#[tokio::test]
async fn test_failed_attempts_kill_daemon_helpers() {
    let env = TestEnv::new();
    let settings = Arc::new(env.dev_settings(HELPER_SPAWNING_DAEMON, (39601, 39610), (39611, 39620)));
    let supervisor = ProcessSupervisor::new(settings, ProcessTreeTerminator::platform());

    let err = supervisor
        .start(&RecordingShell::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StartupError::Daemon { .. }), "{err:?}");

    let helpers = env
        .read_home_file("helpers")
        .lines()
        .map(|l| l.trim().parse::<u32>().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(helpers.len(), 2, "one helper per attempt");
    for pid in helpers {
        assert!(
            wait_until(Duration::from_secs(5), || !pid_alive(pid)),
            "helper {pid} outlived the failed attempt"
        );
    }
}

#[tokio::test]
async fn test_preflight_calls_stale_kill_endpoint() {
    let env = TestEnv::new();
    let stale = RequestRecorder::bind(39621).await;
    let settings = Arc::new(env.dev_settings(FAKE_DAEMON, (39621, 39630), (39631, 39640)));
    let kill_file = settings.kill_file();
    std::fs::write(&kill_file, "/shutdown_stale_daemon\n").unwrap();
    let supervisor = Arc::new(ProcessSupervisor::new(settings, ProcessTreeTerminator::platform()));

    let ports = supervisor.start(&RecordingShell::default()).await.unwrap();

    assert_eq!(stale.paths(), vec!["/health", "/shutdown_stale_daemon"]);
    assert!(!kill_file.exists(), "kill endpoint record should be removed");
    assert_ne!(ports.daemon, stale.port, "occupied port is skipped");
    shut_down(&supervisor).await;
}

#[tokio::test]
async fn test_unreachable_stale_daemon_does_not_block_startup() {
    let env = TestEnv::new();
    let settings = Arc::new(env.dev_settings(FAKE_DAEMON, (39641, 39650), (39651, 39660)));
    let kill_file = settings.kill_file();
    std::fs::write(&kill_file, "shutdown_stale_daemon\n").unwrap();
    let supervisor = Arc::new(ProcessSupervisor::new(settings, ProcessTreeTerminator::platform()));

    let ports = supervisor.start(&RecordingShell::default()).await.unwrap();

    assert!((39641..=39650).contains(&ports.daemon));
    assert!(!kill_file.exists());
    shut_down(&supervisor).await;
}

#[tokio::test]
async fn test_shutdown_asks_daemon_to_stop_services_before_killing_it() {
    let env = TestEnv::new();
    let settings = Arc::new(env.dev_settings(FAKE_DAEMON, (39661, 39670), (39671, 39680)));
    let supervisor = Arc::new(ProcessSupervisor::new(settings, ProcessTreeTerminator::platform()));
    let ports = supervisor.start(&RecordingShell::default()).await.unwrap();
    let daemon_pid = supervisor.process(Role::Daemon).await.unwrap().pid;

    // the fake daemon never binds its port, so the test answers for it
    let seen = Arc::new(Mutex::new(vec![]));
    let observed = seen.clone();
    let daemon_http = RequestRecorder::bind_with(ports.daemon, move |path| {
        observed
            .lock()
            .unwrap()
            .push((path.to_string(), pid_alive(daemon_pid)));
    })
    .await;

    let report = shut_down(&supervisor).await;

    assert_eq!(daemon_http.paths(), vec!["/stop_all_services"]);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("/stop_all_services".to_string(), true)],
        "daemon should still be running when asked to stop its services"
    );
    let step = report
        .steps
        .iter()
        .find(|s| s.name == "stop-daemon-services")
        .unwrap();
    assert!(step.is_ok(), "{step:?}");
    assert!(wait_until(Duration::from_secs(5), || !pid_alive(daemon_pid)));
}
