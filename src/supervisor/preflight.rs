//! Cleanup of a daemon left behind by a previous session.
//!
//! Everything here is best effort: failures are logged and startup goes on.

use super::ProcessSupervisor;
use std::io;
use std::path::Path;

impl ProcessSupervisor {
    pub(crate) async fn preflight(&self) {
        let settings = &self.settings.daemon;
        let port = settings.port_start;

        if self.client.is_alive(port, &settings.health_path).await {
            warn!("a daemon is already answering on port {port}");
        }

        let kill_file = self.settings.kill_file();
        let endpoint = match read_kill_endpoint(&kill_file) {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return,
            Err(e) => {
                warn!("failed to read {}: {e}", kill_file.display());
                return;
            }
        };
        info!("found stale kill endpoint '{endpoint}', asking old daemon on port {port} to exit");
        match self.client.get(port, &endpoint).await {
            Ok(status) => debug!("stale daemon answered {status}"),
            Err(e) => debug!("stale daemon did not answer: {e}"),
        }
        if let Err(e) = std::fs::remove_file(&kill_file) {
            warn!("failed to remove {}: {e}", kill_file.display());
        }
    }
}

/// First non-empty line of the kill file, without surrounding slashes.
pub(crate) fn read_kill_endpoint(path: &Path) -> io::Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(|l| l.trim().trim_matches('/'))
        .find(|l| !l.is_empty())
        .map(str::to_string))
}
