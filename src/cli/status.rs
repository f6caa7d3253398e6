use crate::Result;
use crate::daemon_client::DaemonClient;
use crate::managed_process::Role;
use crate::procs::PROCS;
use crate::ready_state::ReadyState;
use crate::settings::Settings;
use crate::state_file::SessionFile;
use std::path::Path;
use strum::IntoEnumIterator;

/// Show the running session
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "stat",
    verbatim_doc_comment,
    long_about = "\
Show the running session

Reads the session record and checks each recorded process.

Output:
  Supervisor: 4242 (started 2024-05-01 10:00:00)
  daemon    pid 4250   port 8765  ready
  frontend  embedded   port 3000  ready"
)]
pub struct Status {}

impl Status {
    pub async fn run(&self, config: Option<&Path>) -> Result<()> {
        let settings = Settings::load(config)?;
        let Some(session) = SessionFile::read(settings.session_file())? else {
            println!("{} is not running", settings.app.id);
            return Ok(());
        };
        PROCS.refresh_processes();
        let supervisor = if PROCS.is_running(session.supervisor_pid) {
            console::style("running").green()
        } else {
            console::style("gone").red()
        };
        println!(
            "Supervisor: {} {} (started {})",
            session.supervisor_pid,
            supervisor,
            session.started_at.format("%Y-%m-%d %H:%M:%S")
        );

        let client = DaemonClient::new(settings.daemon_request_timeout());
        for role in Role::iter() {
            let Some(process) = session.get(role) else {
                continue;
            };
            let pid = match process.pid {
                Some(pid) => format!("pid {pid}"),
                None => "embedded".to_string(),
            };
            let health_path = match role {
                Role::Daemon => settings.daemon.health_path.as_str(),
                Role::Frontend => "/",
            };
            let state = probe_state(&client, process.pid, process.port, health_path).await;
            println!(
                "{:<9} {:<10} port {:<5} {}",
                role.to_string(),
                pid,
                process.port,
                state.style()
            );
            if let Some(reason) = state.error_message() {
                println!("          {reason}");
            }
        }
        Ok(())
    }
}

async fn probe_state(client: &DaemonClient, pid: Option<u32>, port: u16, health_path: &str) -> ReadyState {
    if let Some(pid) = pid
        && !PROCS.is_running(pid)
    {
        return ReadyState::Failed(format!("process {pid} is not running"));
    }
    if client.is_alive(port, health_path).await {
        ReadyState::Ready
    } else {
        ReadyState::Pending
    }
}
