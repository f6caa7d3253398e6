//! Ordered startup: daemon first, then the frontend, then the GUI.

use super::ProcessSupervisor;
use crate::error::StartupError;
use crate::gui::GuiShell;
use crate::managed_process::Role;
use crate::ports::PortRange;
use serde::Serialize;

/// One retry on a fresh port covers the gap between probing a port and the
/// child binding it.
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ports {
    pub daemon: u16,
    pub frontend: u16,
}

impl ProcessSupervisor {
    /// Start the daemon, then the frontend, then present the GUI.
    pub async fn start(&self, gui: &dyn GuiShell) -> Result<Ports, StartupError> {
        self.preflight().await;

        let daemon_range = PortRange::new(
            self.settings.daemon.port_start,
            self.settings.daemon.port_end,
        )?;
        let daemon = self.start_with_retry(Role::Daemon, daemon_range).await?;

        let frontend_range = PortRange::new(
            self.settings.frontend.port_start,
            self.settings.frontend.port_end,
        )?
        .excluding([daemon]);
        let frontend = self.start_with_retry(Role::Frontend, frontend_range).await?;

        let ports = Ports { daemon, frontend };
        info!("startup complete: daemon on {daemon}, frontend on {frontend}");
        gui.present(&ports);
        Ok(ports)
    }

    async fn start_with_retry(&self, role: Role, range: PortRange) -> Result<u16, StartupError> {
        let mut range = range;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let port = self.ports.find_available_port(&range).await?;
            debug!("starting {role} on port {port} (attempt {attempts}/{MAX_ATTEMPTS})");
            let err = match self.start_role(role, port).await {
                Ok(port) => return Ok(port),
                Err(e) => e,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if attempts >= MAX_ATTEMPTS {
                let source = Box::new(err);
                return Err(match role {
                    Role::Daemon => StartupError::Daemon { attempts, source },
                    Role::Frontend => StartupError::Frontend { attempts, source },
                });
            }
            warn!("{err}, retrying on another port");
            range = range.excluding([port]);
        }
    }

    async fn start_role(&self, role: Role, port: u16) -> Result<u16, StartupError> {
        match role {
            Role::Daemon => {
                let home = self.settings.home();
                let process = self.start_daemon(port, &home).await?;
                self.record_session(role, Some(process.pid), process.port)
                    .await;
                Ok(process.port)
            }
            Role::Frontend => {
                let server = self.start_frontend_server(port).await?;
                self.record_session(role, server.pid(), server.port()).await;
                Ok(server.port())
            }
        }
    }
}
