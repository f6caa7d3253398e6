//! Local socket between a running instance and a second instance or the CLI.
//!
//! Messages are JSON, each terminated by a null byte.

use crate::Result;
use crate::error::IpcError;
use interprocess::local_socket::{GenericFilePath, Name, ToFsName};
use miette::IntoDiagnostic;
use std::path::{Path, PathBuf};

pub mod client;
pub mod server;

pub use client::InstanceClient;
pub use server::InstanceServer;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display)]
pub enum InstanceRequest {
    Ping,
    /// A second instance was launched; bring the window forward
    Focus,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display)]
pub enum InstanceResponse {
    Ok,
    Error(String),
}

pub fn socket_path(state_dir: &Path, app_id: &str) -> PathBuf {
    state_dir.join("sock").join(app_id).with_extension("sock")
}

fn fs_name(path: &Path) -> Result<Name<'_>> {
    let fs_name = path.to_fs_name::<GenericFilePath>().into_diagnostic()?;
    Ok(fs_name)
}

fn serialize<T: serde::Serialize>(msg: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(msg).into_diagnostic()?;
    if bytes.contains(&0) {
        return Err(IpcError::InvalidMessage {
            reason: "message contains null byte".to_string(),
        }
        .into());
    }
    bytes.push(0);
    Ok(bytes)
}

fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    trace!("msg: {:?}", std::str::from_utf8(bytes).unwrap_or_default());
    serde_json::from_slice(bytes).map_err(|e| {
        IpcError::InvalidMessage {
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing() {
        let bytes = serialize(&InstanceRequest::Focus).unwrap();
        assert_eq!(bytes.last(), Some(&0));
        let msg: InstanceRequest = deserialize(&bytes).unwrap();
        assert_eq!(msg, InstanceRequest::Focus);
    }

    #[test]
    fn test_garbage_is_invalid_message() {
        let err = deserialize::<InstanceRequest>(b"{nope\0").unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_socket_path() {
        assert_eq!(
            socket_path(Path::new("/run/appwarden"), "studio"),
            PathBuf::from("/run/appwarden/sock/studio.sock")
        );
    }
}
