use crate::env;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

struct Logger {
    term_level: LevelFilter,
    file_level: LevelFilter,
    log_file: Mutex<Option<File>>,
}

static LOGGER: Lazy<Logger> = Lazy::new(Logger::new);

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // dependencies (hyper, reqwest, ...) only get through at warn and above
        if !metadata.target().starts_with("appwarden") && metadata.level() > Level::Warn {
            return false;
        }
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if record.level() <= self.file_level {
            let mut log_file = self.log_file.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(log_file) = log_file.as_mut() {
                let out = self.render(record, false);
                let _ = writeln!(log_file, "{}", console::strip_ansi_codes(&out));
            }
        }
        if record.level() <= self.term_level {
            let out = self.render(record, true);
            eprintln!("{out}");
        }
    }

    fn flush(&self) {
        let mut log_file = self.log_file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(log_file) = log_file.as_mut() {
            let _ = log_file.flush();
        }
    }
}

impl Logger {
    fn new() -> Self {
        let term_level = *env::APPWARDEN_LOG;
        let file_level = *env::APPWARDEN_LOG_FILE_LEVEL;
        let log_file = match open_log_file(&env::APPWARDEN_LOG_FILE) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!(
                    "appwarden: could not open log file {}: {e}",
                    env::APPWARDEN_LOG_FILE.display()
                );
                None
            }
        };
        Self {
            term_level,
            file_level,
            log_file: Mutex::new(log_file),
        }
    }

    fn set_log_file(&self, path: &Path) -> std::io::Result<()> {
        let file = open_log_file(path)?;
        let mut log_file = self.log_file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = log_file.as_mut() {
            let _ = old.flush();
        }
        *log_file = Some(file);
        Ok(())
    }

    fn max_level(&self) -> LevelFilter {
        self.term_level.max(self.file_level)
    }

    fn render(&self, record: &Record, term: bool) -> String {
        let level = styled_level(record.level());
        let args = record.args();
        if term {
            match record.level() {
                Level::Info => format!("{} {args}", console::style("appwarden").dim()),
                _ => format!("{} {level} {args}", console::style("appwarden").dim()),
            }
        } else {
            let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            format!("{now} {level} {args}")
        }
    }
}

fn styled_level(level: Level) -> String {
    let s = format!("{:5}", level.to_string());
    match level {
        Level::Error => console::style(s).red().to_string(),
        Level::Warn => console::style(s).yellow().to_string(),
        Level::Info => console::style(s).cyan().to_string(),
        Level::Debug => console::style(s).magenta().to_string(),
        Level::Trace => console::style(s).dim().to_string(),
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::options().append(true).create(true).open(path)
}

/// Install the process-wide logger. Safe to call more than once.
pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if let Err(err) = log::set_logger(&*LOGGER) {
            eprintln!("appwarden: failed to initialize logger: {err}");
            return;
        }
        log::set_max_level(LOGGER.max_level());
    });
}

/// Send file output to `path` from now on, e.g. once settings name a logs dir.
pub fn set_log_file(path: &Path) -> std::io::Result<()> {
    LOGGER.set_log_file(path)
}
