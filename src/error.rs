//! Diagnostic error types for the supervisor.
//!
//! Every error carries a miette code and, where the user can act on it, help text.

// False positive: fields are used in #[error] format strings and miette derive macros
#![allow(unused_assignments)]

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from port range construction and port scanning.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("invalid port range {start}..={end}: start is greater than end")]
    #[diagnostic(
        code(appwarden::ports::invalid_range),
        help("check the port_start and port_end values in config.toml")
    )]
    InvalidRange { start: u16, end: u16 },

    #[error("no available port in range {start}..={end}")]
    #[diagnostic(
        code(appwarden::ports::exhausted),
        help(
            "every port in the range is in use or excluded.\nStop whatever is holding these ports or widen the range in config.toml"
        )
    )]
    Exhausted { start: u16, end: u16 },
}

/// Errors surfaced while waiting for a managed process to become ready.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("{role} failed to start: {reason}")]
    #[diagnostic(code(appwarden::readiness::failed))]
    Failed { role: String, reason: String },

    #[error("{role} did not become ready within {}", humantime::format_duration(*timeout))]
    #[diagnostic(
        code(appwarden::readiness::timeout),
        help("raise ready_timeout in config.toml, or set it to \"0s\" to wait indefinitely")
    )]
    Timeout {
        role: String,
        timeout: std::time::Duration,
    },

    #[error("{role} output monitor stopped before readiness was determined")]
    #[diagnostic(code(appwarden::readiness::monitor_gone))]
    Exited { role: String },
}

/// Errors from starting the daemon and frontend server.
#[derive(Debug, Error, Diagnostic)]
pub enum StartupError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Port(#[from] PortError),

    #[error("failed to spawn {role}: {command}")]
    #[diagnostic(
        code(appwarden::startup::spawn_failed),
        help("check that the executable exists and is executable")
    )]
    Spawn {
        role: String,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid {role} command: {reason}")]
    #[diagnostic(
        code(appwarden::startup::invalid_command),
        help("check the dev_run value in config.toml")
    )]
    Command { role: String, reason: String },

    #[error("{role} on port {port} did not become ready")]
    #[diagnostic(code(appwarden::startup::not_ready))]
    NotReady {
        role: String,
        port: u16,
        #[source]
        #[diagnostic_source]
        source: ReadinessError,
    },

    #[error("daemon failed to start after {attempts} attempts")]
    #[diagnostic(
        code(appwarden::startup::daemon),
        help("see the daemon log in the logs directory for its output")
    )]
    Daemon {
        attempts: u32,
        #[source]
        source: Box<StartupError>,
    },

    #[error("frontend server failed to start after {attempts} attempts")]
    #[diagnostic(
        code(appwarden::startup::frontend),
        help("see the frontend log in the logs directory for its output")
    )]
    Frontend {
        attempts: u32,
        #[source]
        source: Box<StartupError>,
    },

    #[error("not starting {role}: shutdown in progress")]
    #[diagnostic(code(appwarden::startup::shutting_down))]
    ShuttingDown { role: String },

    #[error("failed to serve embedded frontend on port {port}")]
    #[diagnostic(code(appwarden::startup::embedded))]
    Embedded {
        port: u16,
        #[source]
        source: io::Error,
    },
}

impl StartupError {
    /// Whether retrying on a different port could help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StartupError::NotReady { .. })
    }
}

/// A single failed kill inside a process tree.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum KillError {
    #[error("no such process: {pid}")]
    #[diagnostic(code(appwarden::procs::no_such_process))]
    NoSuchProcess { pid: u32 },

    #[error("failed to kill process {pid}: {reason}")]
    #[diagnostic(code(appwarden::procs::kill_failed))]
    Failed { pid: u32, reason: String },
}

impl KillError {
    pub fn is_no_such_process(&self) -> bool {
        matches!(self, KillError::NoSuchProcess { .. })
    }
}

/// Kill failures collected while terminating a process tree.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to terminate process tree of {pid} ({} of {attempted} kills failed)", errors.len())]
#[diagnostic(
    code(appwarden::procs::terminate_failed),
    help("the processes may need manual intervention. Try: kill -9 <pid>")
)]
pub struct TerminateError {
    pub pid: u32,
    pub attempted: usize,
    pub errors: Vec<KillError>,
}

/// Errors from the shutdown sequence.
#[derive(Debug, Error, Diagnostic)]
pub enum ShutdownError {
    #[error("shutdown step '{step}' timed out after {}", humantime::format_duration(*timeout))]
    #[diagnostic(code(appwarden::shutdown::step_timeout))]
    StepTimeout {
        step: String,
        timeout: std::time::Duration,
    },

    #[error("daemon at port {port} rejected {path}: HTTP {status}")]
    #[diagnostic(code(appwarden::shutdown::daemon_rejected))]
    DaemonRejected {
        port: u16,
        path: String,
        status: u16,
    },
}

/// Errors from the single-instance lock.
#[derive(Debug, Error, Diagnostic)]
pub enum InstanceError {
    #[error("failed to open instance lock: {}", path.display())]
    #[diagnostic(
        code(appwarden::instance::open_failed),
        help("check that the state directory is writable")
    )]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to lock instance lock: {}", path.display())]
    #[diagnostic(code(appwarden::instance::lock_failed))]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Error for TOML configuration parse failures with source code highlighting.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to parse configuration")]
#[diagnostic(code(appwarden::config::parse_error))]
pub struct ConfigParseError {
    #[source_code]
    pub src: NamedSource<String>,

    #[label("{message}")]
    pub span: SourceSpan,

    pub message: String,

    #[help]
    pub help: Option<String>,
}

impl ConfigParseError {
    pub fn from_toml_error(path: &std::path::Path, contents: String, err: toml::de::Error) -> Self {
        let message = err.message().to_string();
        let span = err
            .span()
            .map(|r| SourceSpan::from(r.start..r.end))
            .unwrap_or_else(|| SourceSpan::from(0..0));

        Self {
            src: NamedSource::new(path.display().to_string(), contents),
            span,
            message,
            help: Some("config.toml must be valid TOML; see https://toml.io".to_string()),
        }
    }
}

/// Errors related to the config and session files.
#[derive(Debug, Error, Diagnostic)]
pub enum FileError {
    #[error("failed to read file: {}", path.display())]
    #[diagnostic(code(appwarden::file::read_error))]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file: {}", path.display())]
    #[diagnostic(code(appwarden::file::write_error))]
    WriteError {
        path: PathBuf,
        #[help]
        details: Option<String>,
    },

    #[error("failed to remove file: {}", path.display())]
    #[diagnostic(code(appwarden::file::remove_error))]
    RemoveError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize data for file: {}", path.display())]
    #[diagnostic(code(appwarden::file::serialize_error))]
    SerializeError {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
}

/// Errors on the local socket between instances.
#[derive(Debug, Error, Diagnostic)]
pub enum IpcError {
    #[error("failed to connect to running instance after {attempts} attempts")]
    #[diagnostic(code(appwarden::ipc::connection_failed))]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: Option<io::Error>,
        #[help]
        help: String,
    },

    #[error("instance request timed out after {seconds}s")]
    #[diagnostic(
        code(appwarden::ipc::timeout),
        help("the running instance may be stuck shutting down.\nCheck it with: appwarden status")
    )]
    Timeout { seconds: u64 },

    #[error("instance connection closed unexpectedly")]
    #[diagnostic(code(appwarden::ipc::connection_closed))]
    ConnectionClosed,

    #[error("failed to read instance response")]
    #[diagnostic(code(appwarden::ipc::read_failed))]
    ReadFailed {
        #[source]
        source: io::Error,
    },

    #[error("failed to send instance request")]
    #[diagnostic(code(appwarden::ipc::send_failed))]
    SendFailed {
        #[source]
        source: io::Error,
    },

    #[error("instance message is invalid: {reason}")]
    #[diagnostic(code(appwarden::ipc::invalid_message))]
    InvalidMessage { reason: String },
}
