use crate::Result;
use crate::ipc::{InstanceRequest, InstanceResponse, deserialize, fs_name, serialize};
use interprocess::local_socket::ListenerOptions;
use interprocess::local_socket::tokio::{RecvHalf, SendHalf};
use interprocess::local_socket::traits::tokio::Listener;
use interprocess::local_socket::traits::tokio::Stream;
use miette::{IntoDiagnostic, miette};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{Receiver, Sender};

/// Listener for requests from other appwarden processes.
///
/// Only create this while holding the instance lock; any existing socket
/// file is assumed stale and replaced.
pub struct InstanceServer {
    path: PathBuf,
    rx: Receiver<(InstanceRequest, Sender<InstanceResponse>)>,
}

impl InstanceServer {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            xx::file::mkdirp(dir)?;
        }
        let _ = xx::file::remove_file(path);
        let opts = ListenerOptions::new().name(fs_name(path)?);
        debug!("Listening on {}", path.display());
        let (tx, rx) = tokio::sync::mpsc::channel(4);

        // Socket must be created 0600
        #[cfg(unix)]
        let old_umask = unsafe { libc::umask(0o077) };

        let listener = opts.create_tokio();

        #[cfg(unix)]
        unsafe {
            libc::umask(old_umask);
        }
        let listener = listener.into_diagnostic()?;

        tokio::spawn(async move {
            loop {
                if let Err(err) = Self::accept(&listener, tx.clone()).await {
                    error!("instance server {:?}", err);
                }
                if tx.is_closed() {
                    break;
                }
            }
        });
        Ok(Self {
            path: path.to_path_buf(),
            rx,
        })
    }

    async fn send(send: &mut SendHalf, msg: InstanceResponse) -> Result<()> {
        let msg = serialize(&msg)?;
        if let Err(err) = send.write_all(&msg).await {
            trace!("Failed to send message: {:?}", err);
        }
        Ok(())
    }

    async fn read_message(recv: &mut BufReader<RecvHalf>) -> Result<Option<InstanceRequest>> {
        let mut bytes = Vec::new();
        recv.read_until(0, &mut bytes).await.into_diagnostic()?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(deserialize(&bytes)?))
    }

    /// Next request and the channel its reply goes to.
    pub async fn read(&mut self) -> Result<(InstanceRequest, Sender<InstanceResponse>)> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| miette!("instance channel closed"))
    }

    async fn accept(
        listener: &interprocess::local_socket::tokio::Listener,
        tx: Sender<(InstanceRequest, Sender<InstanceResponse>)>,
    ) -> Result<()> {
        let stream = listener.accept().await.into_diagnostic()?;
        trace!("Client accepted");
        let (recv, mut send) = stream.split();
        let mut recv = BufReader::new(recv);
        let (reply_tx, mut reply_rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            loop {
                let msg = match Self::read_message(&mut recv).await {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        trace!("Client disconnected");
                        break;
                    }
                    Err(err) => {
                        warn!("Failed to read instance request: {:?}", err);
                        let _ = Self::send(&mut send, InstanceResponse::Error(err.to_string())).await;
                        break;
                    }
                };
                trace!("Received message: {:?}", msg);
                if tx.send((msg, reply_tx.clone())).await.is_err() {
                    break;
                }
                match reply_rx.recv().await {
                    Some(reply) => {
                        if let Err(err) = Self::send(&mut send, reply).await {
                            warn!("Failed to send message: {:?}", err);
                        }
                    }
                    None => break,
                }
            }
        });
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(&self) {
        debug!("Closing instance server");
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for InstanceServer {
    fn drop(&mut self) {
        self.close();
    }
}
