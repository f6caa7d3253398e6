use once_cell::sync::Lazy;
pub use std::env::*;
use std::path::PathBuf;

pub static APPWARDEN_BIN: Lazy<PathBuf> = Lazy::new(|| {
    current_exe()
        .and_then(|p| p.canonicalize())
        .unwrap_or_else(|e| {
            eprintln!("Warning: Could not determine appwarden binary path: {e}");
            args()
                .next()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("appwarden"))
        })
});
/// Directory holding the appwarden binary; packaged helpers are resolved relative to it
pub static APPWARDEN_BIN_DIR: Lazy<PathBuf> = Lazy::new(|| {
    APPWARDEN_BIN
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| CWD.clone())
});
pub static CWD: Lazy<PathBuf> = Lazy::new(|| current_dir().unwrap_or_else(|_| PathBuf::from(".")));

pub static HOME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::home_dir().unwrap_or_else(|| {
        eprintln!("Warning: Could not determine home directory");
        temp_dir()
    })
});
pub static APPWARDEN_CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    var_path("APPWARDEN_CONFIG_DIR").unwrap_or(
        dirs::config_dir()
            .unwrap_or(HOME_DIR.join(".config"))
            .join("appwarden"),
    )
});
pub static APPWARDEN_CONFIG_FILE: Lazy<PathBuf> = Lazy::new(|| {
    var_path("APPWARDEN_CONFIG").unwrap_or(APPWARDEN_CONFIG_DIR.join("config.toml"))
});
pub static APPWARDEN_STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    var_path("APPWARDEN_STATE_DIR").unwrap_or(
        dirs::state_dir()
            .unwrap_or(HOME_DIR.join(".local").join("state"))
            .join("appwarden"),
    )
});
pub static APPWARDEN_LOG: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("APPWARDEN_LOG").unwrap_or(log::LevelFilter::Info));
pub static APPWARDEN_LOG_FILE_LEVEL: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("APPWARDEN_LOG_FILE_LEVEL").unwrap_or(*APPWARDEN_LOG));
pub static APPWARDEN_LOGS_DIR: Lazy<PathBuf> =
    Lazy::new(|| var_path("APPWARDEN_LOGS_DIR").unwrap_or(APPWARDEN_STATE_DIR.join("logs")));
pub static APPWARDEN_LOG_FILE: Lazy<PathBuf> =
    Lazy::new(|| APPWARDEN_LOGS_DIR.join("appwarden").join("appwarden.log"));

// Overrides applied on top of config.toml
pub static APPWARDEN_MODE: Lazy<Option<String>> = Lazy::new(|| var("APPWARDEN_MODE").ok());
pub static APPWARDEN_HOME: Lazy<Option<PathBuf>> = Lazy::new(|| var_path("APPWARDEN_HOME"));

fn var_path(name: &str) -> Option<PathBuf> {
    var(name).map(PathBuf::from).ok()
}

fn var_log_level(name: &str) -> Option<log::LevelFilter> {
    var(name).ok().and_then(|level| level.parse().ok())
}
