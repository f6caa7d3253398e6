//! One running supervisor per app id.
//!
//! The first process takes an exclusive lock on `<state_dir>/<app_id>.lock`
//! and holds it until it exits. Later processes fail to lock, forward a focus
//! request over the instance socket and exit.

use crate::Result;
use crate::error::InstanceError;
use crate::ipc::{InstanceClient, socket_path};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub struct InstanceGuard {
    app_id: String,
    lock_path: PathBuf,
    socket_path: PathBuf,
    lock: Mutex<Option<File>>,
}

impl InstanceGuard {
    pub fn new(state_dir: &Path, app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            lock_path: state_dir.join(format!("{app_id}.lock")),
            socket_path: socket_path(state_dir, app_id),
            lock: Mutex::new(None),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Take the instance lock.
    ///
    /// Returns `false` when another process holds it. Calling this again
    /// after a successful acquire returns `true` without relocking.
    pub fn acquire(&self) -> Result<bool, InstanceError> {
        let mut lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if lock.is_some() {
            return Ok(true);
        }
        if let Some(dir) = self.lock_path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| InstanceError::Open {
                path: self.lock_path.clone(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| InstanceError::Open {
                path: self.lock_path.clone(),
                source,
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                debug!("{} is held by another instance", self.lock_path.display());
                return Ok(false);
            }
            Err(source) => {
                return Err(InstanceError::Lock {
                    path: self.lock_path.clone(),
                    source,
                });
            }
        }
        // the pid is informational only
        if let Err(e) = file
            .set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
        {
            warn!("failed to write pid to {}: {e}", self.lock_path.display());
        }
        debug!("acquired instance lock {}", self.lock_path.display());
        *lock = Some(file);
        Ok(true)
    }

    pub fn is_held(&self) -> bool {
        self.lock
            .lock()
            .map(|l| l.is_some())
            .unwrap_or_default()
    }

    /// Ask the instance holding the lock to bring its window forward.
    pub async fn notify_existing(&self) -> Result<()> {
        info!("{} is already running, focusing it", self.app_id);
        let mut client = InstanceClient::connect(&self.socket_path).await?;
        client.focus().await
    }

    pub fn release(&self) {
        let file = self.lock.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(file) = file {
            if let Err(e) = FileExt::unlock(&file) {
                warn!("failed to unlock {}: {e}", self.lock_path.display());
            }
            debug!("released instance lock {}", self.lock_path.display());
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_guard_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let first = InstanceGuard::new(dir.path(), "studio");
        let second = InstanceGuard::new(dir.path(), "studio");

        assert!(first.acquire().unwrap());
        assert!(first.acquire().unwrap(), "reacquiring is a no-op");
        assert!(!second.acquire().unwrap());
        assert!(!second.is_held());

        let pid = std::fs::read_to_string(first.lock_path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_released_lock_can_be_taken() {
        let dir = tempfile::tempdir().unwrap();
        let first = InstanceGuard::new(dir.path(), "studio");
        assert!(first.acquire().unwrap());
        first.release();

        let second = InstanceGuard::new(dir.path(), "studio");
        assert!(second.acquire().unwrap());
    }

    #[test]
    fn test_app_ids_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let studio = InstanceGuard::new(dir.path(), "studio");
        let viewer = InstanceGuard::new(dir.path(), "viewer");
        assert!(studio.acquire().unwrap());
        assert!(viewer.acquire().unwrap());
    }
}
