#![allow(dead_code)]

use appwarden_cli::gui::GuiShell;
use appwarden_cli::procs::PROCS;
use appwarden_cli::settings::{Mode, Settings};
use appwarden_cli::supervisor::Ports;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Prints the ready marker and then idles. Arguments are written to
/// `<home>/daemon.args`.
pub const FAKE_DAEMON: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --port=*) port="${arg#--port=}" ;;
    --home=*) home="${arg#--home=}" ;;
  esac
done
echo "$@" > "$home/daemon.args"
echo "INFO:     Started server process"
echo "INFO:     Uvicorn running on http://127.0.0.1:$port (Press CTRL+C to quit)"
exec sleep 30
"#;

/// Reports a bind failure the first time it runs, then behaves like
/// [`FAKE_DAEMON`].
pub const FLAKY_DAEMON: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --port=*) port="${arg#--port=}" ;;
    --home=*) home="${arg#--home=}" ;;
  esac
done
if [ ! -f "$home/failed_once" ]; then
  echo "$port" > "$home/failed_once"
  echo "ERROR:    [Errno 98] error while attempting to bind on address: address already in use" >&2
  exec sleep 30
fi
echo "INFO:     Uvicorn running on http://127.0.0.1:$port"
exec sleep 30
"#;

pub const BROKEN_DAEMON: &str = r#"
echo "ERROR:    [Errno 98] address already in use" >&2
exec sleep 30
"#;

/// Starts a background helper, records its pid in `<home>/helpers`, then
/// reports a bind failure.
pub const HELPER_SPAWNING_DAEMON: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --home=*) home="${arg#--home=}" ;;
  esac
done
sleep 300 &
echo "$!" >> "$home/helpers"
echo "ERROR:    [Errno 98] address already in use" >&2
wait
"#;

/// Args: `<home> <port>`. Records its environment in `<home>/frontend.env`.
pub const FAKE_FRONTEND: &str = r#"
echo "PORT=$PORT DAEMON=$APPWARDEN_DAEMON_PORT" > "$1/frontend.env"
echo "  VITE v5.0.0  ready in 300 ms"
echo "  ➜  Local:   http://localhost:$2/"
exec sleep 30
"#;

/// Isolated home, state and log directories for one test.
pub struct TestEnv {
    temp_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        for dir in ["home", "state", "logs", "static"] {
            fs::create_dir_all(temp_dir.path().join(dir)).unwrap();
        }
        fs::write(
            temp_dir.path().join("static").join("index.html"),
            "<html><body>appwarden test frontend</body></html>",
        )
        .unwrap();
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn home(&self) -> PathBuf {
        self.path().join("home")
    }

    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        path
    }

    /// Production-mode settings with an embedded frontend and short timeouts.
    pub fn settings(&self, daemon_ports: (u16, u16), frontend_ports: (u16, u16)) -> Settings {
        let mut settings = Settings::default();
        settings.app.id = "appwarden-test".to_string();
        settings.app.home = Some(self.home());
        settings.app.state_dir = Some(self.path().join("state"));
        settings.app.logs_dir = Some(self.path().join("logs"));
        settings.daemon.port_start = daemon_ports.0;
        settings.daemon.port_end = daemon_ports.1;
        settings.daemon.ready_timeout = "10s".to_string();
        settings.daemon.request_timeout = "1s".to_string();
        settings.frontend.port_start = frontend_ports.0;
        settings.frontend.port_end = frontend_ports.1;
        settings.frontend.ready_timeout = "10s".to_string();
        settings.frontend.static_dir = Some(self.path().join("static"));
        settings.shutdown.step_timeout = "5s".to_string();
        settings.shutdown.exit_grace = "1s".to_string();
        settings
    }

    /// Development-mode settings running `daemon_script` and [`FAKE_FRONTEND`] through `sh`.
    pub fn dev_settings(
        &self,
        daemon_script: &str,
        daemon_ports: (u16, u16),
        frontend_ports: (u16, u16),
    ) -> Settings {
        let daemon = self.write_script("daemon.sh", daemon_script);
        let frontend = self.write_script("frontend.sh", FAKE_FRONTEND);
        let mut settings = self.settings(daemon_ports, frontend_ports);
        settings.app.mode = Mode::Development;
        settings.daemon.dev_run = format!("sh {}", daemon.display());
        settings.frontend.dev_run = format!("sh {} {} {{port}}", frontend.display(), self.home().display());
        settings
    }

    pub fn read_home_file(&self, name: &str) -> String {
        fs::read_to_string(self.home().join(name)).unwrap_or_default()
    }
}

/// Refreshes the process table for `pid` first.
pub fn pid_alive(pid: u32) -> bool {
    PROCS.refresh_pids(&[pid]);
    PROCS.is_running(pid)
}

pub fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    f()
}

/// GUI shell that records what it was asked to do.
#[derive(Default)]
pub struct RecordingShell {
    pub presented: Mutex<Option<Ports>>,
    pub focused: AtomicUsize,
    pub torn_down: AtomicUsize,
    pub fatal: Mutex<Vec<String>>,
}

impl RecordingShell {
    pub fn presented(&self) -> Option<Ports> {
        *self.presented.lock().unwrap()
    }

    pub fn fatal(&self) -> Vec<String> {
        self.fatal.lock().unwrap().clone()
    }
}

impl GuiShell for RecordingShell {
    fn present(&self, ports: &Ports) {
        *self.presented.lock().unwrap() = Some(*ports);
    }

    fn focus_main_window(&self) {
        self.focused.fetch_add(1, Ordering::SeqCst);
    }

    fn teardown(&self) -> appwarden_cli::Result<()> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notify_fatal(&self, message: &str) {
        self.fatal.lock().unwrap().push(message.to_string());
    }
}

type RequestHook = Arc<dyn Fn(&str) + Send + Sync>;

/// HTTP server on `127.0.0.1` that answers 200 to everything and records
/// the request paths.
pub struct RequestRecorder {
    pub port: u16,
    paths: Arc<Mutex<Vec<String>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RequestRecorder {
    pub async fn bind(port: u16) -> Self {
        Self::bind_with(port, |_| {}).await
    }

    /// `on_request` runs with the path before the response is sent.
    pub async fn bind_with(port: u16, on_request: impl Fn(&str) + Send + Sync + 'static) -> Self {
        let paths = Arc::new(Mutex::new(vec![]));
        let hook: RequestHook = Arc::new(on_request);
        let recorded = paths.clone();
        let app = axum::Router::new().fallback(move |uri: axum::http::Uri| {
            let recorded = recorded.clone();
            let hook = hook.clone();
            async move {
                hook(uri.path());
                recorded.lock().unwrap().push(uri.path().to_string());
                "ok"
            }
        });
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        Self {
            port,
            paths,
            shutdown: Some(tx),
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

impl Drop for RequestRecorder {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
