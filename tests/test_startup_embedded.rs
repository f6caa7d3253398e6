//! Production startup with a packaged daemon binary and the embedded frontend.
//!
//! Kept in its own test binary: the daemon script is written and then executed
//! directly, which must not race with forks from other tests.

#![cfg(unix)]

mod common;

use appwarden_cli::gui::GuiShell;
use appwarden_cli::managed_process::Role;
use appwarden_cli::procs::ProcessTreeTerminator;
use appwarden_cli::shutdown::ShutdownCoordinator;
use appwarden_cli::supervisor::ProcessSupervisor;
use common::{FAKE_DAEMON, RecordingShell, TestEnv, pid_alive, wait_until};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_production_startup_with_embedded_frontend() {
    let env = TestEnv::new();
    let binary = env.write_script("studio-daemon", FAKE_DAEMON);
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
    let mut settings = env.settings((39401, 39410), (39411, 39420));
    settings.daemon.binary = Some(binary);
    let settings = Arc::new(settings);

    let supervisor = Arc::new(ProcessSupervisor::new(settings.clone(), ProcessTreeTerminator::platform()));
    let gui = Arc::new(RecordingShell::default());
    let ports = supervisor.start(gui.as_ref()).await.unwrap();

    let args = env.read_home_file("daemon.args");
    assert!(args.starts_with(&format!("daemon --port={}", ports.daemon)), "{args}");
    assert!(supervisor.has_embedded_frontend().await);
    assert!(supervisor.process(Role::Frontend).await.is_none());

    let client = reqwest::Client::new();
    let body = client
        .get(format!("http://127.0.0.1:{}/", ports.frontend))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("appwarden test frontend"));
    let deep_link = client
        .get(format!("http://127.0.0.1:{}/projects/42", ports.frontend))
        .send()
        .await
        .unwrap();
    assert!(deep_link.status().is_success());

    let daemon = supervisor.process(Role::Daemon).await.unwrap();
    let shell: Arc<dyn GuiShell> = gui.clone();
    let coordinator = ShutdownCoordinator::for_supervisor(supervisor.clone(), shell);
    let report = coordinator.shutdown().await;
    assert!(!report.has_fatal_failure(), "{report:?}");

    assert!(wait_until(Duration::from_secs(5), || !pid_alive(daemon.pid)));
    assert!(!supervisor.has_embedded_frontend().await);
    assert!(std::net::TcpListener::bind(("127.0.0.1", ports.frontend)).is_ok());
}
