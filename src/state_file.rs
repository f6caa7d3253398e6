use crate::Result;
use crate::error::FileError;
use crate::managed_process::Role;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// On-disk record of the running session, read by `appwarden status`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionFile {
    pub supervisor_pid: u32,
    pub started_at: DateTime<Local>,
    /// Keyed by role name; TOML tables need string keys
    #[serde(default)]
    pub processes: BTreeMap<String, SessionProcess>,
    #[serde(skip)]
    pub(crate) path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionProcess {
    /// Absent for a frontend served in-process
    pub pid: Option<u32>,
    pub port: u16,
}

impl SessionFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            supervisor_pid: std::process::id(),
            started_at: Local::now(),
            processes: BTreeMap::new(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no session is recorded.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let _lock = xx::fslock::get(path, false)?;
        let raw = xx::file::read_to_string(path).unwrap_or_else(|e| {
            warn!("Error reading session file {:?}: {}", path, e);
            String::new()
        });
        match toml::from_str::<Self>(&raw) {
            Ok(mut session) => {
                session.path = path.to_path_buf();
                Ok(Some(session))
            }
            Err(e) => {
                warn!("Error parsing session file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    pub fn set(&mut self, role: Role, pid: Option<u32>, port: u16) {
        self.processes
            .insert(role.to_string(), SessionProcess { pid, port });
    }

    pub fn get(&self, role: Role) -> Option<&SessionProcess> {
        self.processes.get(&role.to_string())
    }

    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            xx::file::mkdirp(parent)?;
        }
        let _lock = xx::fslock::get(&self.path, false)?;
        let raw = toml::to_string(self).map_err(|e| FileError::SerializeError {
            path: self.path.clone(),
            source: e,
        })?;
        xx::file::write(&self.path, raw).map_err(|e| FileError::WriteError {
            path: self.path.clone(),
            details: Some(e.to_string()),
        })?;
        Ok(())
    }

    /// A missing file counts as removed.
    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FileError::RemoveError {
                path: path.to_path_buf(),
                source,
            }
            .into()),
        }
    }
}
