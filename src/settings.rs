//! User-configurable settings for appwarden.
//!
//! Settings are resolved in this order (highest priority first):
//! 1. Environment variables (`APPWARDEN_MODE`, `APPWARDEN_HOME`)
//! 2. `config.toml` in the appwarden config directory (or `APPWARDEN_CONFIG`)
//! 3. Built-in defaults
//!
//! Example config.toml:
//! ```toml
//! [app]
//! id = "studio"
//! mode = "development"
//!
//! [daemon]
//! dev_run = "uv run python -m studio.daemon"
//! ready_timeout = "2m"
//!
//! [frontend]
//! dev_run = "npm run dev -- --port {port}"
//! ```
//!
//! Durations are humantime strings ("500ms", "10s", "1m").

use crate::Result;
use crate::env;
use crate::error::{ConfigParseError, FileError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIs,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "release" => Some(Mode::Production),
            "development" | "dev" => Some(Mode::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub daemon: DaemonSettings,
    pub frontend: FrontendSettings,
    pub shutdown: ShutdownSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Names the instance lock, the instance socket and the default home dir
    pub id: String,
    pub mode: Mode,
    pub home: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub logs_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Packaged daemon executable; defaults to `daemon` next to the appwarden binary
    pub binary: Option<PathBuf>,
    /// Command used to run the daemon from source in development mode
    pub dev_run: String,
    pub env: IndexMap<String, String>,
    pub port_start: u16,
    pub port_end: u16,
    pub ready_output: String,
    pub fail_output: String,
    /// Path polled over HTTP for readiness, e.g. "/health". Empty disables polling.
    pub ready_http: String,
    pub ready_timeout: String,
    pub health_path: String,
    pub stop_path: String,
    pub kill_file: Option<PathBuf>,
    pub request_timeout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendSettings {
    /// Serve `static_dir` in-process instead of spawning a server in production
    pub embedded: bool,
    /// Production frontend command, used when `embedded` is false.
    /// `{port}` is replaced with the assigned port.
    pub run: String,
    /// Development frontend command. `{port}` is replaced with the assigned port.
    pub dev_run: String,
    pub env: IndexMap<String, String>,
    pub port_start: u16,
    pub port_end: u16,
    pub ready_output: String,
    pub fail_output: String,
    pub ready_http: String,
    pub ready_timeout: String,
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub step_timeout: String,
    /// How long a child gets between SIGTERM and SIGKILL
    pub exit_grace: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            id: "appwarden".to_string(),
            mode: Mode::Production,
            home: None,
            state_dir: None,
            logs_dir: None,
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            binary: None,
            dev_run: String::new(),
            env: IndexMap::new(),
            port_start: 8765,
            port_end: 8799,
            ready_output: "Uvicorn running on".to_string(),
            fail_output: "address already in use".to_string(),
            ready_http: String::new(),
            ready_timeout: "60s".to_string(),
            health_path: "/health".to_string(),
            stop_path: "stop_all_services".to_string(),
            kill_file: None,
            request_timeout: "5s".to_string(),
        }
    }
}

impl Default for FrontendSettings {
    fn default() -> Self {
        Self {
            embedded: true,
            run: String::new(),
            dev_run: "npm run dev -- --port {port}".to_string(),
            env: IndexMap::new(),
            port_start: 3000,
            port_end: 3099,
            ready_output: "Local:".to_string(),
            fail_output: "EADDRINUSE".to_string(),
            ready_http: String::new(),
            ready_timeout: "60s".to_string(),
            static_dir: None,
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            step_timeout: "10s".to_string(),
            exit_grace: "2s".to_string(),
        }
    }
}

impl Settings {
    /// Load `config.toml` (or `path`) over the defaults, then apply env overrides.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(&*env::APPWARDEN_CONFIG_FILE);
        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| FileError::ReadError {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml_str(path, contents)?
        } else {
            trace!("no config file at {}", path.display());
            Self::default()
        };
        settings.load_from_env();
        Ok(settings)
    }

    pub fn from_toml_str(path: &Path, contents: String) -> Result<Self, ConfigParseError> {
        toml::from_str(&contents).map_err(|e| ConfigParseError::from_toml_error(path, contents, e))
    }

    pub fn load_from_env(&mut self) {
        if let Some(mode) = &*env::APPWARDEN_MODE {
            match Mode::parse(mode) {
                Some(m) => self.app.mode = m,
                None => warn!("ignoring invalid APPWARDEN_MODE: {mode}"),
            }
        }
        if let Some(home) = &*env::APPWARDEN_HOME {
            self.app.home = Some(home.clone());
        }
    }

    pub fn parse_duration(s: &str) -> Option<Duration> {
        humantime::parse_duration(s.trim()).ok()
    }

    fn duration_or(value: &str, default: &str, name: &str) -> Duration {
        Self::parse_duration(value).unwrap_or_else(|| {
            warn!("invalid duration for {name}: {value:?}, using {default}");
            Self::parse_duration(default).unwrap_or_default()
        })
    }

    pub fn is_dev(&self) -> bool {
        self.app.mode.is_development()
    }

    /// Directory handed to the daemon as `--home`
    pub fn home(&self) -> PathBuf {
        self.app
            .home
            .clone()
            .unwrap_or_else(|| env::HOME_DIR.join(format!(".{}", self.app.id)))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.app
            .state_dir
            .clone()
            .unwrap_or_else(|| env::APPWARDEN_STATE_DIR.clone())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.app
            .logs_dir
            .clone()
            .unwrap_or_else(|| env::APPWARDEN_LOGS_DIR.clone())
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("appwarden").join("appwarden.log")
    }

    pub fn daemon_binary(&self) -> PathBuf {
        self.daemon
            .binary
            .clone()
            .unwrap_or_else(|| env::APPWARDEN_BIN_DIR.join(exe_name("daemon")))
    }

    pub fn kill_file(&self) -> PathBuf {
        self.daemon
            .kill_file
            .clone()
            .unwrap_or_else(|| self.home().join("kill_endpoint"))
    }

    pub fn static_dir(&self) -> PathBuf {
        self.frontend
            .static_dir
            .clone()
            .unwrap_or_else(|| env::APPWARDEN_BIN_DIR.join("frontend"))
    }

    pub fn session_file(&self) -> PathBuf {
        self.state_dir().join(format!("{}.session.toml", self.app.id))
    }

    /// `None` means wait forever
    pub fn daemon_ready_timeout(&self) -> Option<Duration> {
        non_zero(Self::duration_or(
            &self.daemon.ready_timeout,
            "60s",
            "daemon.ready_timeout",
        ))
    }

    /// `None` means wait forever
    pub fn frontend_ready_timeout(&self) -> Option<Duration> {
        non_zero(Self::duration_or(
            &self.frontend.ready_timeout,
            "60s",
            "frontend.ready_timeout",
        ))
    }

    pub fn daemon_request_timeout(&self) -> Duration {
        Self::duration_or(
            &self.daemon.request_timeout,
            "5s",
            "daemon.request_timeout",
        )
    }

    pub fn shutdown_step_timeout(&self) -> Duration {
        Self::duration_or(
            &self.shutdown.step_timeout,
            "10s",
            "shutdown.step_timeout",
        )
    }

    pub fn shutdown_exit_grace(&self) -> Duration {
        Self::duration_or(&self.shutdown.exit_grace, "2s", "shutdown.exit_grace")
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}
