//! Spawning the daemon and frontend server and watching their output.

use super::ProcessSupervisor;
use crate::daemon_client::DaemonClient;
use crate::error::StartupError;
use crate::managed_process::{ExitState, Launch, ManagedProcess, Role};
use crate::readiness::{ReadinessMonitor, ReadinessProbe};
use crate::web::EmbeddedFrontend;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::select;
use tokio::sync::watch;
use tokio::time;

/// How long output keeps being drained after the process exits.
/// Grandchildren holding the pipes open must not keep the monitor alive.
const DRAIN_AFTER_EXIT: Duration = Duration::from_secs(1);
const HTTP_CHECK_INTERVAL: Duration = Duration::from_millis(500);
const LOG_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// A running frontend: either a child process or the in-process static server.
#[derive(Debug, Clone)]
pub enum FrontendServer {
    Spawned(ManagedProcess),
    Embedded { port: u16 },
}

impl FrontendServer {
    pub fn port(&self) -> u16 {
        match self {
            FrontendServer::Spawned(p) => p.port,
            FrontendServer::Embedded { port } => *port,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            FrontendServer::Spawned(p) => Some(p.pid),
            FrontendServer::Embedded { .. } => None,
        }
    }
}

impl ProcessSupervisor {
    /// Spawn the daemon on `port` and wait for it to report ready.
    pub async fn start_daemon(
        &self,
        port: u16,
        home: &Path,
    ) -> Result<ManagedProcess, StartupError> {
        let launch = self.daemon_launch(port, home)?;
        let settings = &self.settings.daemon;
        let mut probe = ReadinessProbe::new()
            .ready_output(settings.ready_output.as_str())
            .fail_output(settings.fail_output.as_str())
            .timeout(self.settings.daemon_ready_timeout());
        if !settings.ready_http.is_empty() {
            probe = probe.ready_http(DaemonClient::url(port, &settings.ready_http));
        }
        self.spawn_managed(launch, probe).await
    }

    /// Start the frontend on `port`. Only call once the daemon is ready.
    pub async fn start_frontend_server(&self, port: u16) -> Result<FrontendServer, StartupError> {
        if !self.settings.is_dev() && self.settings.frontend.embedded {
            return self.start_embedded_frontend(port).await;
        }
        let launch = self.frontend_launch(port).await?;
        let settings = &self.settings.frontend;
        let mut probe = ReadinessProbe::new()
            .ready_output(settings.ready_output.as_str())
            .fail_output(settings.fail_output.as_str())
            .timeout(self.settings.frontend_ready_timeout());
        if !settings.ready_http.is_empty() {
            probe = probe.ready_http(DaemonClient::url(port, &settings.ready_http));
        }
        self.spawn_managed(launch, probe)
            .await
            .map(FrontendServer::Spawned)
    }

    async fn start_embedded_frontend(&self, port: u16) -> Result<FrontendServer, StartupError> {
        let mut embedded = self.embedded.lock().await;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(StartupError::ShuttingDown {
                role: Role::Frontend.to_string(),
            });
        }
        let static_dir = self.settings.static_dir();
        let server = EmbeddedFrontend::bind(port, &static_dir).await?;
        let port = server.port();
        *embedded = Some(server);
        Ok(FrontendServer::Embedded { port })
    }

    fn daemon_launch(&self, port: u16, home: &Path) -> Result<Launch, StartupError> {
        let role = Role::Daemon;
        let (command, mut args) = if self.settings.is_dev() {
            split_command(role, &self.settings.daemon.dev_run)?
        } else {
            let binary = self.settings.daemon_binary();
            (binary.to_string_lossy().to_string(), vec!["daemon".to_string()])
        };
        args.push(format!("--port={port}"));
        args.push(format!("--home={}", home.display()));
        Ok(Launch {
            role,
            port,
            command,
            args,
            env: self.settings.daemon.env.clone(),
            log_path: self.log_path(role),
        })
    }

    async fn frontend_launch(&self, port: u16) -> Result<Launch, StartupError> {
        let role = Role::Frontend;
        let template = if self.settings.is_dev() {
            &self.settings.frontend.dev_run
        } else {
            &self.settings.frontend.run
        };
        let (command, args) = split_command(role, &template.replace("{port}", &port.to_string()))?;
        let mut env = self.settings.frontend.env.clone();
        env.insert("PORT".to_string(), port.to_string());
        if let Some(daemon) = self.process(Role::Daemon).await {
            env.insert("APPWARDEN_DAEMON_PORT".to_string(), daemon.port.to_string());
        }
        Ok(Launch {
            role,
            port,
            command,
            args,
            env,
            log_path: self.log_path(role),
        })
    }

    fn log_path(&self, role: Role) -> PathBuf {
        self.settings
            .logs_dir()
            .join(role.to_string())
            .join(format!("{role}.log"))
    }

    /// Spawn `launch`, register it, and wait for `probe` to resolve.
    ///
    /// On a readiness failure the process is terminated and unregistered
    /// before the error is returned.
    async fn spawn_managed(
        &self,
        launch: Launch,
        probe: ReadinessProbe,
    ) -> Result<ManagedProcess, StartupError> {
        let role = launch.role;
        let port = launch.port;
        if let Some(parent) = launch.log_path.parent()
            && let Err(e) = xx::file::mkdirp(parent)
        {
            warn!("failed to create log dir for {role}: {e}");
        }

        let (process, waiter) = {
            let mut processes = self.processes.lock().await;
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(StartupError::ShuttingDown {
                    role: role.to_string(),
                });
            }

            info!("starting {role}: {}", launch.display_command());
            let mut cmd = Command::new(&launch.command);
            cmd.args(&launch.args)
                .envs(&launch.env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            let spawn_error = |source: std::io::Error| StartupError::Spawn {
                role: role.to_string(),
                command: launch.display_command(),
                source,
            };
            let mut child = cmd.spawn().map_err(&spawn_error)?;
            let pid = child.id().ok_or_else(|| {
                spawn_error(std::io::Error::other("process exited before its pid was read"))
            })?;
            let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
                (Some(out), Some(err)) => (out, err),
                _ => {
                    let _ = child.start_kill();
                    return Err(spawn_error(std::io::Error::other(
                        "failed to capture stdout/stderr",
                    )));
                }
            };

            let (monitor, waiter) = ReadinessMonitor::new(role, probe);
            let log_path = launch.log_path.clone();
            let process = ManagedProcess::supervise(launch, pid, child, monitor.state());
            info!("started {process}");
            tokio::spawn(monitor_output(
                role,
                stdout,
                stderr,
                log_path,
                monitor,
                process.exit_watch(),
                self.client.clone(),
            ));
            processes.insert(role, process.clone());
            (process, waiter)
        };

        match waiter.wait().await {
            Ok(()) => {
                info!("{process} is ready");
                Ok(process)
            }
            Err(source) => {
                error!("{source}");
                // helpers it started would otherwise outlive the failed attempt
                if let Err(e) = self.terminator.terminate_tree_async(process.pid).await {
                    warn!("{e}");
                }
                if let Err(e) = process
                    .terminate(self.settings.shutdown_exit_grace())
                    .await
                {
                    warn!("failed to terminate {process}: {e}");
                }
                let mut processes = self.processes.lock().await;
                if processes.get(&role).is_some_and(|p| p.pid == process.pid) {
                    processes.remove(&role);
                }
                Err(StartupError::NotReady {
                    role: role.to_string(),
                    port,
                    source,
                })
            }
        }
    }
}

fn split_command(role: Role, command: &str) -> Result<(String, Vec<String>), StartupError> {
    let mut words = shell_words::split(command).map_err(|e| StartupError::Command {
        role: role.to_string(),
        reason: e.to_string(),
    })?;
    if words.is_empty() {
        return Err(StartupError::Command {
            role: role.to_string(),
            reason: "no command configured".to_string(),
        });
    }
    let program = words.remove(0);
    Ok((program, words))
}

/// Forward a child's output to its log file and feed it to the readiness monitor
/// until the process exits and its pipes are drained.
async fn monitor_output(
    role: Role,
    stdout: ChildStdout,
    stderr: ChildStderr,
    log_path: PathBuf,
    mut monitor: ReadinessMonitor,
    mut exit: watch::Receiver<ExitState>,
    client: DaemonClient,
) {
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;

    let mut log_appender = match File::options()
        .append(true)
        .create(true)
        .open(&log_path)
        .await
    {
        Ok(f) => Some(BufWriter::new(f)),
        Err(e) => {
            error!("failed to open log file for {role}: {e}");
            None
        }
    };

    let mut http_check_interval = time::interval(HTTP_CHECK_INTERVAL);
    let mut log_flush_interval = time::interval(LOG_FLUSH_INTERVAL);
    let mut exit_code: Option<Option<i32>> = None;
    let mut drain_deadline: Option<Pin<Box<time::Sleep>>> = None;

    loop {
        select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => record_line(role, &line, &mut log_appender, &mut monitor).await,
                Ok(None) => stdout_open = false,
                Err(e) => {
                    debug!("{role} stdout closed: {e}");
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => record_line(role, &line, &mut log_appender, &mut monitor).await,
                Ok(None) => stderr_open = false,
                Err(e) => {
                    debug!("{role} stderr closed: {e}");
                    stderr_open = false;
                }
            },
            changed = exit.changed(), if exit_code.is_none() => {
                let state = match changed {
                    Ok(()) => *exit.borrow_and_update(),
                    Err(_) => ExitState::Exited(None),
                };
                if let ExitState::Exited(code) = state {
                    debug!("{role} exited, draining output");
                    exit_code = Some(code);
                    drain_deadline = Some(Box::pin(time::sleep(DRAIN_AFTER_EXIT)));
                }
            }
            _ = async {
                match drain_deadline.as_mut() {
                    Some(deadline) => deadline.await,
                    None => std::future::pending::<()>().await,
                }
            }, if drain_deadline.is_some() => {
                debug!("{role} output still open after exit, no longer monitoring");
                break;
            }
            _ = http_check_interval.tick(), if monitor.wants_http() => {
                if let Some(url) = monitor.http_url().map(str::to_string) {
                    match client.get_url(&url).await {
                        Ok(status) if status.is_success() => monitor.http_ready(status.as_u16()),
                        Ok(status) => trace!("{role} HTTP check: status {status} (not ready)"),
                        Err(e) => trace!("{role} HTTP check failed: {e}"),
                    }
                }
            }
            _ = log_flush_interval.tick() => {
                if let Some(appender) = log_appender.as_mut()
                    && let Err(e) = appender.flush().await
                {
                    error!("failed to flush log for {role}: {e}");
                }
            }
        }
        if exit_code.is_some() && !stdout_open && !stderr_open {
            break;
        }
    }

    if let Some(appender) = log_appender.as_mut()
        && let Err(e) = appender.flush().await
    {
        error!("failed to flush log for {role}: {e}");
    }
    if let Some(code) = exit_code {
        monitor.exited(code);
    }
}

async fn record_line(
    role: Role,
    line: &str,
    log_appender: &mut Option<BufWriter<File>>,
    monitor: &mut ReadinessMonitor,
) {
    trace!("{role}: {line}");
    if let Some(appender) = log_appender.as_mut() {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let formatted = format!("{now} {role} {line}\n");
        if let Err(e) = appender.write_all(formatted.as_bytes()).await {
            error!("failed to write to log for {role}: {e}");
        }
    }
    let was_resolved = monitor.is_resolved();
    monitor.observe_line(line);
    if !was_resolved
        && monitor.is_resolved()
        && let Some(appender) = log_appender.as_mut()
    {
        // make the lines that decided readiness visible right away
        let _ = appender.flush().await;
    }
}
