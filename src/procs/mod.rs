mod tree;

pub use tree::{PlatformProcessTable, ProcessTable, ProcessTreeTerminator};

use once_cell::sync::Lazy;
use std::sync::Mutex;
use sysinfo::{ProcessStatus, ProcessesToUpdate};

/// Shared snapshot of the OS process table.
pub struct Procs {
    system: Mutex<sysinfo::System>,
}

pub static PROCS: Lazy<Procs> = Lazy::new(Procs::new);

impl Default for Procs {
    fn default() -> Self {
        Self::new()
    }
}

impl Procs {
    pub fn new() -> Self {
        let procs = Self {
            system: Mutex::new(sysinfo::System::new()),
        };
        procs.refresh_processes();
        procs
    }

    fn lock_system(&self) -> std::sync::MutexGuard<'_, sysinfo::System> {
        self.system.lock().unwrap_or_else(|poisoned| {
            warn!("process table mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn title(&self, pid: u32) -> Option<String> {
        self.lock_system()
            .process(sysinfo::Pid::from_u32(pid))
            .map(|p| p.name().to_string_lossy().to_string())
    }

    /// Zombies count as gone: they hold no resources except their table slot.
    pub fn is_running(&self, pid: u32) -> bool {
        self.lock_system()
            .process(sysinfo::Pid::from_u32(pid))
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }

    /// Every process whose ancestor chain reaches `pid`, in no particular order.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let system = self.lock_system();
        let root = sysinfo::Pid::from_u32(pid);
        let mut found = vec![];
        for (child_pid, process) in system.processes() {
            if *child_pid == root {
                continue;
            }
            let mut process = process;
            let mut depth = 0;
            while let Some(parent) = process.parent() {
                if parent == root {
                    found.push(child_pid.as_u32());
                    break;
                }
                // guards against parent cycles in a torn snapshot
                depth += 1;
                if depth > 256 {
                    break;
                }
                match system.process(parent) {
                    Some(p) => process = p,
                    None => break,
                }
            }
        }
        found
    }

    pub fn refresh_processes(&self) {
        self.lock_system()
            .refresh_processes(ProcessesToUpdate::All, true);
    }

    pub fn refresh_pids(&self, pids: &[u32]) {
        let pids = pids
            .iter()
            .map(|p| sysinfo::Pid::from_u32(*p))
            .collect::<Vec<_>>();
        self.lock_system()
            .refresh_processes(ProcessesToUpdate::Some(&pids), true);
    }
}
