//! Force-termination of a process and everything it spawned.
//!
//! The OS-specific parts live behind [`ProcessTable`]: enumerating descendants
//! and delivering an uncatchable kill to a single pid. [`ProcessTreeTerminator`]
//! drives the table and aggregates failures so one stubborn process never
//! stops the rest of the tree from being killed.

use crate::error::{KillError, TerminateError};
use std::sync::Arc;

pub trait ProcessTable: Send + Sync {
    /// All live descendants of `pid` (not including `pid`).
    fn descendants(&self, pid: u32) -> Vec<u32>;

    /// Forcefully kill a single process.
    fn kill(&self, pid: u32) -> Result<(), KillError>;
}

#[cfg(unix)]
pub type PlatformProcessTable = UnixProcessTable;
#[cfg(windows)]
pub type PlatformProcessTable = WindowsProcessTable;

#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcessTable;

#[cfg(unix)]
impl ProcessTable for UnixProcessTable {
    fn descendants(&self, pid: u32) -> Vec<u32> {
        super::PROCS.refresh_processes();
        super::PROCS.descendants(pid)
    }

    fn kill(&self, pid: u32) -> Result<(), KillError> {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return Err(KillError::NoSuchProcess { pid });
        };
        match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(KillError::NoSuchProcess { pid }),
            Err(e) => Err(KillError::Failed {
                pid,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProcessTable;

#[cfg(windows)]
impl ProcessTable for WindowsProcessTable {
    fn descendants(&self, pid: u32) -> Vec<u32> {
        super::PROCS.refresh_processes();
        super::PROCS.descendants(pid)
    }

    fn kill(&self, pid: u32) -> Result<(), KillError> {
        let output = duct::cmd!("taskkill", "/PID", pid.to_string(), "/F")
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()
            .map_err(|e| KillError::Failed {
                pid,
                reason: e.to_string(),
            })?;
        if output.status.success() {
            return Ok(());
        }
        // taskkill's message is localized, so ask the process table instead
        super::PROCS.refresh_pids(&[pid]);
        let text = String::from_utf8_lossy(&output.stdout);
        Err(kill_failure(pid, super::PROCS.is_running(pid), &text))
    }
}

/// Classify a failed kill by whether `pid` still exists afterwards.
#[cfg_attr(not(windows), allow(dead_code))]
fn kill_failure(pid: u32, still_running: bool, output: &str) -> KillError {
    if still_running {
        KillError::Failed {
            pid,
            reason: output.trim().to_string(),
        }
    } else {
        KillError::NoSuchProcess { pid }
    }
}

#[derive(Clone)]
pub struct ProcessTreeTerminator {
    table: Arc<dyn ProcessTable>,
}

impl ProcessTreeTerminator {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self { table }
    }

    pub fn platform() -> Self {
        Self::new(Arc::new(PlatformProcessTable::default()))
    }

    /// Kill every descendant of `pid`, then `pid` itself.
    ///
    /// The tree is enumerated once before any kill is sent. Processes that are
    /// already gone are not errors, so calling this twice is harmless.
    pub fn terminate_tree(&self, pid: u32) -> Result<(), TerminateError> {
        let own_pid = std::process::id();
        let mut targets = self.table.descendants(pid);
        targets.push(pid);
        targets.retain(|p| *p != own_pid);
        debug!("terminating process tree of {pid}: {targets:?}");

        let attempted = targets.len();
        let errors = targets
            .into_iter()
            .filter_map(|p| self.table.kill(p).err())
            .filter(|e| !e.is_no_such_process())
            .collect::<Vec<_>>();

        if errors.is_empty() {
            Ok(())
        } else {
            for e in &errors {
                warn!("{e}");
            }
            Err(TerminateError {
                pid,
                attempted,
                errors,
            })
        }
    }

    pub async fn terminate_tree_async(&self, pid: u32) -> Result<(), TerminateError> {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.terminate_tree(pid)).await {
            Ok(result) => result,
            Err(e) => Err(TerminateError {
                pid,
                attempted: 0,
                errors: vec![KillError::Failed {
                    pid,
                    reason: e.to_string(),
                }],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_kill_failure_ignores_message_language() {
        let gone = kill_failure(4242, false, "FEHLER: Der Prozess \"4242\" wurde nicht gefunden.");
        assert!(gone.is_no_such_process());

        let denied = kill_failure(4242, true, "  ERROR: Access is denied.\r\n");
        match denied {
            KillError::Failed { pid, reason } => {
                assert_eq!(pid, 4242);
                assert_eq!(reason, "ERROR: Access is denied.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    struct FakeTable {
        children: Vec<u32>,
        failing: Vec<u32>,
        gone: Vec<u32>,
        killed: Mutex<Vec<u32>>,
    }

    impl ProcessTable for FakeTable {
        fn descendants(&self, _pid: u32) -> Vec<u32> {
            self.children.clone()
        }

        fn kill(&self, pid: u32) -> Result<(), KillError> {
            self.killed.lock().unwrap().push(pid);
            if self.gone.contains(&pid) {
                Err(KillError::NoSuchProcess { pid })
            } else if self.failing.contains(&pid) {
                Err(KillError::Failed {
                    pid,
                    reason: "permission denied".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn terminator(table: Arc<FakeTable>) -> ProcessTreeTerminator {
        ProcessTreeTerminator::new(table)
    }

    #[test]
    fn test_kills_every_descendant_even_when_first_fails() {
        let table = Arc::new(FakeTable {
            children: vec![11, 12, 13],
            failing: vec![11],
            gone: vec![],
            killed: Mutex::new(vec![]),
        });
        let err = terminator(table.clone()).terminate_tree(10).unwrap_err();

        assert_eq!(*table.killed.lock().unwrap(), vec![11, 12, 13, 10]);
        assert_eq!(err.attempted, 4);
        assert_eq!(err.errors.len(), 1);
    }

    #[test]
    fn test_vanished_processes_are_not_errors() {
        let table = Arc::new(FakeTable {
            children: vec![21],
            failing: vec![],
            gone: vec![20, 21],
            killed: Mutex::new(vec![]),
        });
        assert!(terminator(table.clone()).terminate_tree(20).is_ok());
        assert!(terminator(table).terminate_tree(20).is_ok());
    }

    #[test]
    fn test_never_kills_own_pid() {
        let own = std::process::id();
        let table = Arc::new(FakeTable {
            children: vec![own, 31],
            failing: vec![],
            gone: vec![],
            killed: Mutex::new(vec![]),
        });
        terminator(table.clone()).terminate_tree(30).unwrap();
        assert!(!table.killed.lock().unwrap().contains(&own));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_kill_of_missing_pid() {
        let err = UnixProcessTable.kill(i32::MAX as u32).unwrap_err();
        assert!(err.is_no_such_process());
    }
}
