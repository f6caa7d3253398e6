use crate::Result;
use crate::error::IpcError;
use crate::ipc::{InstanceRequest, InstanceResponse, deserialize, fs_name, serialize};
use exponential_backoff::Backoff;
use interprocess::local_socket::tokio::{RecvHalf, SendHalf};
use interprocess::local_socket::traits::tokio::Stream;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub struct InstanceClient {
    recv: BufReader<RecvHalf>,
    send: SendHalf,
}

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_MIN_DELAY: Duration = Duration::from_millis(100);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

impl InstanceClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        Self::connect_with_attempts(path, CONNECT_ATTEMPTS).await
    }

    pub async fn connect_with_attempts(path: &Path, attempts: u32) -> Result<Self> {
        let mut last_err = None;
        for duration in Backoff::new(attempts, CONNECT_MIN_DELAY, CONNECT_MAX_DELAY) {
            match interprocess::local_socket::tokio::Stream::connect(fs_name(path)?).await {
                Ok(conn) => {
                    let (recv, send) = conn.split();
                    trace!("Connected to {}", path.display());
                    return Ok(Self {
                        recv: BufReader::new(recv),
                        send,
                    });
                }
                Err(err) => {
                    debug!("Failed to connect to instance socket: {err}");
                    last_err = Some(err);
                    match duration {
                        Some(duration) => tokio::time::sleep(duration).await,
                        None => break,
                    }
                }
            }
        }
        Err(IpcError::ConnectionFailed {
            attempts,
            source: last_err,
            help: "is appwarden running? Check with: appwarden status".to_string(),
        }
        .into())
    }

    async fn send(&mut self, msg: &InstanceRequest) -> Result<()> {
        let msg = serialize(msg)?;
        self.send
            .write_all(&msg)
            .await
            .map_err(|source| IpcError::SendFailed { source })?;
        Ok(())
    }

    async fn read(&mut self, timeout: Duration) -> Result<InstanceResponse> {
        let mut bytes = Vec::new();
        match tokio::time::timeout(timeout, self.recv.read_until(0, &mut bytes)).await {
            Ok(Ok(_)) => {}
            Ok(Err(source)) => return Err(IpcError::ReadFailed { source }.into()),
            Err(_) => {
                return Err(IpcError::Timeout {
                    seconds: timeout.as_secs(),
                }
                .into());
            }
        }
        if bytes.is_empty() {
            return Err(IpcError::ConnectionClosed.into());
        }
        deserialize(&bytes)
    }

    pub async fn request(&mut self, msg: InstanceRequest) -> Result<InstanceResponse> {
        self.send(&msg).await?;
        self.read(REQUEST_TIMEOUT).await
    }

    async fn expect_ok(&mut self, msg: InstanceRequest) -> Result<()> {
        match self.request(msg).await? {
            InstanceResponse::Ok => Ok(()),
            InstanceResponse::Error(e) => miette::bail!("running instance refused: {e}"),
        }
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.expect_ok(InstanceRequest::Ping).await
    }

    pub async fn focus(&mut self) -> Result<()> {
        self.expect_ok(InstanceRequest::Focus).await
    }

    pub async fn quit(&mut self) -> Result<()> {
        self.expect_ok(InstanceRequest::Quit).await
    }
}
