use crate::ready_state::ReadyState;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Child;
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIs,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Daemon,
    Frontend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIs)]
pub enum ExitState {
    Running,
    Exited(Option<i32>),
}

#[derive(Debug, Clone, Copy)]
enum StopSignal {
    Term,
    Kill,
}

type ControlRequest = (StopSignal, oneshot::Sender<io::Result<()>>);

/// What to run for a role, before it is running.
#[derive(Debug, Clone)]
pub struct Launch {
    pub role: Role,
    pub port: u16,
    pub command: String,
    pub args: Vec<String>,
    pub env: IndexMap<String, String>,
    pub log_path: PathBuf,
}

impl Launch {
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_words::quote)
            .join(" ")
    }
}

/// Handle to a child process started by the supervisor.
///
/// The OS child handle lives in a dedicated task that reaps it; this handle
/// talks to that task, so it can be cloned freely and outlives nothing.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub role: Role,
    pub pid: u32,
    pub port: u16,
    pub command: String,
    pub args: Vec<String>,
    pub env: IndexMap<String, String>,
    pub log_path: PathBuf,
    ready_state: Arc<Mutex<ReadyState>>,
    control: mpsc::Sender<ControlRequest>,
    exit: watch::Receiver<ExitState>,
}

impl Display for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (pid {}, port {})", self.role, self.pid, self.port)
    }
}

impl ManagedProcess {
    /// Take ownership of `child` and reap it in the background.
    pub fn supervise(
        launch: Launch,
        pid: u32,
        mut child: Child,
        ready_state: Arc<Mutex<ReadyState>>,
    ) -> Self {
        let (control, mut control_rx) = mpsc::channel::<ControlRequest>(4);
        let (exit_tx, exit) = watch::channel(ExitState::Running);
        let role = launch.role;

        tokio::spawn(async move {
            loop {
                select! {
                    status = child.wait() => {
                        let code = match status {
                            Ok(status) => {
                                info!("{role} (pid {pid}) exited with {status}");
                                status.code()
                            }
                            Err(e) => {
                                error!("failed to wait on {role} (pid {pid}): {e}");
                                None
                            }
                        };
                        let _ = exit_tx.send(ExitState::Exited(code));
                        break;
                    }
                    Some((signal, reply)) = control_rx.recv() => {
                        let result = match signal {
                            StopSignal::Term => send_term(&mut child),
                            StopSignal::Kill => child.start_kill(),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
        });

        Self {
            role,
            pid,
            port: launch.port,
            command: launch.command,
            args: launch.args,
            env: launch.env,
            log_path: launch.log_path,
            ready_state,
            control,
            exit,
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn exit_state(&self) -> ExitState {
        *self.exit.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.exit_state().is_running()
    }

    /// Subscribe to the exit of the process.
    pub fn exit_watch(&self) -> watch::Receiver<ExitState> {
        self.exit.clone()
    }

    /// Wait until the process has been reaped. `None` on timeout.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<ExitState> {
        let mut exit = self.exit.clone();
        match tokio::time::timeout(timeout, exit.wait_for(|s| s.is_exited())).await {
            Ok(Ok(state)) => Some(*state),
            // the reaper task is gone, so the child is too
            Ok(Err(_)) => Some(ExitState::Exited(None)),
            Err(_) => None,
        }
    }

    async fn signal(&self, signal: StopSignal) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.control.send((signal, tx)).await.is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Ask the process to stop, escalating to a kill after `grace`.
    pub async fn terminate(&self, grace: Duration) -> io::Result<()> {
        if !self.is_running() {
            debug!("{self} already exited");
            return Ok(());
        }
        debug!("terminating {self}");
        if let Err(e) = self.signal(StopSignal::Term).await {
            warn!("failed to signal {self}: {e}");
        }
        if self.wait_exit(grace).await.is_some() {
            return Ok(());
        }
        warn!("{self} did not exit within {grace:?}, killing");
        self.signal(StopSignal::Kill).await?;
        match self.wait_exit(grace).await {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{self} still running after kill"),
            )),
        }
    }
}

#[cfg(unix)]
fn send_term(child: &mut Child) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}

#[cfg(not(unix))]
fn send_term(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
