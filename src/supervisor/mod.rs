//! Process supervisor for the daemon and the frontend server.
//!
//! - `lifecycle`: spawning a role, output monitoring, readiness
//! - `preflight`: best-effort cleanup of a previous session's daemon
//! - `startup`: ordered startup with port allocation and retry

mod lifecycle;
mod preflight;
mod startup;

pub use lifecycle::FrontendServer;
pub use startup::Ports;

use crate::Result;
use crate::daemon_client::DaemonClient;
use crate::managed_process::{ManagedProcess, Role};
use crate::ports::PortAllocator;
use crate::procs::ProcessTreeTerminator;
use crate::settings::Settings;
use crate::state_file::SessionFile;
use crate::web::EmbeddedFrontend;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

pub struct ProcessSupervisor {
    pub(crate) settings: Arc<Settings>,
    pub(crate) client: DaemonClient,
    pub(crate) ports: PortAllocator,
    pub(crate) terminator: ProcessTreeTerminator,
    pub(crate) processes: Mutex<BTreeMap<Role, ManagedProcess>>,
    pub(crate) embedded: Mutex<Option<EmbeddedFrontend>>,
    pub(crate) session: Mutex<SessionFile>,
    /// Set under the `processes` lock; no spawn happens once it is set
    pub(crate) shutting_down: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new(settings: Arc<Settings>, terminator: ProcessTreeTerminator) -> Self {
        let client = DaemonClient::new(settings.daemon_request_timeout());
        let session = SessionFile::new(settings.session_file());
        Self {
            settings,
            client,
            ports: PortAllocator::new(),
            terminator,
            processes: Mutex::new(BTreeMap::new()),
            embedded: Mutex::new(None),
            session: Mutex::new(session),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn client(&self) -> &DaemonClient {
        &self.client
    }

    pub fn terminator(&self) -> &ProcessTreeTerminator {
        &self.terminator
    }

    pub async fn process(&self, role: Role) -> Option<ManagedProcess> {
        self.processes.lock().await.get(&role).cloned()
    }

    /// Drop the handle once termination is confirmed.
    pub async fn forget(&self, role: Role) -> Option<ManagedProcess> {
        self.processes.lock().await.remove(&role)
    }

    pub async fn take_embedded_frontend(&self) -> Option<EmbeddedFrontend> {
        self.embedded.lock().await.take()
    }

    pub async fn has_embedded_frontend(&self) -> bool {
        self.embedded.lock().await.is_some()
    }

    /// Refuse all further spawns. Processes already started are untouched.
    pub async fn begin_shutdown(&self) {
        let _processes = self.processes.lock().await;
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) async fn record_session(&self, role: Role, pid: Option<u32>, port: u16) {
        let mut session = self.session.lock().await;
        session.set(role, pid, port);
        if let Err(e) = session.write() {
            warn!("failed to write session file: {e}");
        }
    }

    pub async fn clear_session(&self) -> Result<()> {
        let session = self.session.lock().await;
        SessionFile::remove(session.path())
    }
}
