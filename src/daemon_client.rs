//! HTTP calls from the supervisor to the backend daemon.

use crate::Result;
use crate::error::ShutdownError;
use miette::IntoDiagnostic;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// `path` may be given with or without a leading slash.
    pub fn url(port: u16, path: &str) -> String {
        format!("http://localhost:{port}/{}", path.trim_start_matches('/'))
    }

    pub async fn get(&self, port: u16, path: &str) -> Result<reqwest::StatusCode> {
        self.get_url(&Self::url(port, path)).await
    }

    pub async fn get_url(&self, url: &str) -> Result<reqwest::StatusCode> {
        trace!("GET {url}");
        let response = self.client.get(url).send().await.into_diagnostic()?;
        Ok(response.status())
    }

    /// Any HTTP answer counts as alive.
    pub async fn is_alive(&self, port: u16, health_path: &str) -> bool {
        match self.get(port, health_path).await {
            Ok(status) => {
                debug!("daemon on port {port} answered {status}");
                true
            }
            Err(e) => {
                trace!("no daemon on port {port}: {e}");
                false
            }
        }
    }

    /// Ask the daemon to stop the helper services it spawned.
    pub async fn stop_all_services(&self, port: u16, stop_path: &str) -> Result<()> {
        let status = self.get(port, stop_path).await?;
        if status.is_success() {
            info!("daemon on port {port} stopped its services");
            Ok(())
        } else {
            Err(ShutdownError::DaemonRejected {
                port,
                path: stop_path.to_string(),
                status: status.as_u16(),
            }
            .into())
        }
    }
}
