//! Readiness detection for managed processes.
//!
//! A [`ReadinessProbe`] says what counts as ready: a substring in the output,
//! a failure substring, an HTTP URL that answers 2xx. The output monitor feeds
//! what it sees into a [`ReadinessMonitor`], which resolves exactly once; the
//! spawning side awaits the paired [`ReadyWaiter`].

use crate::error::ReadinessError;
use crate::managed_process::Role;
use crate::ready_state::ReadyState;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub ready_output: Option<String>,
    pub fail_output: Option<String>,
    pub ready_http: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMatch {
    Ready,
    Failed(String),
}

impl ReadinessProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty strings disable the marker.
    pub fn ready_output(mut self, marker: impl Into<String>) -> Self {
        self.ready_output = Some(marker.into()).filter(|m: &String| !m.is_empty());
        self
    }

    pub fn fail_output(mut self, marker: impl Into<String>) -> Self {
        self.fail_output = Some(marker.into()).filter(|m: &String| !m.is_empty());
        self
    }

    pub fn ready_http(mut self, url: impl Into<String>) -> Self {
        self.ready_http = Some(url.into()).filter(|u: &String| !u.is_empty());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Without a success signal there is nothing to wait for.
    pub fn has_detection(&self) -> bool {
        self.ready_output.is_some() || self.ready_http.is_some()
    }

    /// The failure marker is checked first, so a line carrying both fails.
    pub fn match_line(&self, line: &str) -> Option<LineMatch> {
        if let Some(fail) = &self.fail_output
            && line.contains(fail.as_str())
        {
            return Some(LineMatch::Failed(line.trim().to_string()));
        }
        if let Some(ready) = &self.ready_output
            && line.contains(ready.as_str())
        {
            return Some(LineMatch::Ready);
        }
        None
    }
}

pub struct ReadinessMonitor {
    role: Role,
    probe: ReadinessProbe,
    state: Arc<Mutex<ReadyState>>,
    tx: Option<oneshot::Sender<ReadyState>>,
}

pub struct ReadyWaiter {
    role: Role,
    state: Arc<Mutex<ReadyState>>,
    rx: oneshot::Receiver<ReadyState>,
    timeout: Option<Duration>,
}

impl ReadinessMonitor {
    pub fn new(role: Role, probe: ReadinessProbe) -> (Self, ReadyWaiter) {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(ReadyState::Pending));
        let waiter = ReadyWaiter {
            role,
            state: state.clone(),
            rx,
            timeout: probe.timeout,
        };
        let mut monitor = Self {
            role,
            probe,
            state,
            tx: Some(tx),
        };
        if !monitor.probe.has_detection() {
            debug!("{role} has no readiness check configured, assuming ready");
            monitor.resolve(ReadyState::Ready);
        }
        (monitor, waiter)
    }

    pub fn state(&self) -> Arc<Mutex<ReadyState>> {
        self.state.clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    pub fn wants_http(&self) -> bool {
        !self.is_resolved() && self.probe.ready_http.is_some()
    }

    pub fn http_url(&self) -> Option<&str> {
        self.probe.ready_http.as_deref()
    }

    pub fn observe_line(&mut self, line: &str) {
        if self.is_resolved() {
            return;
        }
        match self.probe.match_line(line) {
            Some(LineMatch::Ready) => {
                info!("{} ready: output matched", self.role);
                self.resolve(ReadyState::Ready);
            }
            Some(LineMatch::Failed(reason)) => {
                warn!("{} failed: {reason}", self.role);
                self.resolve(ReadyState::Failed(reason));
            }
            None => {}
        }
    }

    pub fn http_ready(&mut self, status: u16) {
        if !self.is_resolved() {
            info!("{} ready: HTTP check passed (status {status})", self.role);
            self.resolve(ReadyState::Ready);
        }
    }

    pub fn exited(&mut self, code: Option<i32>) {
        if !self.is_resolved() {
            let reason = match code {
                Some(code) => format!("exited with code {code}"),
                None => "exited by signal".to_string(),
            };
            warn!("{} {reason} before becoming ready", self.role);
            self.resolve(ReadyState::Failed(reason));
        }
    }

    /// First resolution wins; later calls are ignored.
    fn resolve(&mut self, resolved: ReadyState) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.is_resolved() {
                // the waiter timed out first
                return;
            }
            *state = resolved.clone();
        }
        let _ = tx.send(resolved);
    }
}

impl ReadyWaiter {
    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn wait(self) -> Result<(), ReadinessError> {
        let role = self.role.to_string();
        let received = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    if state.is_pending() {
                        *state = ReadyState::Failed(format!(
                            "not ready after {}",
                            humantime::format_duration(timeout)
                        ));
                        return Err(ReadinessError::Timeout { role, timeout });
                    }
                    // resolved between the timer firing and taking the lock
                    Ok(state.clone())
                }
            },
            None => self.rx.await,
        };
        match received {
            Ok(ReadyState::Ready) => Ok(()),
            Ok(ReadyState::Failed(reason)) => Err(ReadinessError::Failed { role, reason }),
            Ok(ReadyState::Pending) | Err(_) => Err(ReadinessError::Exited { role }),
        }
    }
}
