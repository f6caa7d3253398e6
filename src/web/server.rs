use crate::error::StartupError;
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::path::Path;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::{ServeDir, ServeFile};

/// Static frontend served from the supervisor process itself.
///
/// Stands in for a frontend server child process when the frontend is
/// packaged as plain files.
pub struct EmbeddedFrontend {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EmbeddedFrontend {
    /// Bind `127.0.0.1:<port>` and start serving `static_dir`, falling back to
    /// `index.html` for unknown paths. Returns once the socket is bound.
    pub async fn bind(port: u16, static_dir: &Path) -> Result<Self, StartupError> {
        let index = static_dir.join("index.html");
        let serve_dir = ServeDir::new(static_dir).fallback(ServeFile::new(index));
        let app = Router::new()
            .route("/health", get(health_check))
            .fallback_service(serve_dir);

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| StartupError::Embedded { port, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| StartupError::Embedded { port, source })?
            .port();

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
            match result {
                Ok(()) => debug!("embedded frontend on port {port} stopped"),
                Err(e) => error!("embedded frontend error: {e}"),
            }
        });

        info!(
            "serving {} on http://localhost:{port}",
            static_dir.display()
        );
        Ok(Self {
            port,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("embedded frontend task failed: {e}");
        }
    }
}

impl Drop for EmbeddedFrontend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
