//! Funnels every reason to exit into a single shutdown.
//!
//! OS signals, panics, the GUI's quit and window events and the instance
//! channel all call [`CrashHandler::trigger`]. [`CrashHandler::wait`] runs the
//! shutdown for the first trigger and turns it into an exit code.

use crate::Result;
use crate::shutdown::ShutdownCoordinator;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
#[cfg(unix)]
use tokio::signal::unix::SignalKind;
use tokio::select;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitTrigger {
    Quit,
    AllWindowsClosed,
    Signal(String),
    Fault(String),
}

impl ExitTrigger {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitTrigger::Fault(_) => 1,
            ExitTrigger::Quit | ExitTrigger::AllWindowsClosed | ExitTrigger::Signal(_) => 0,
        }
    }
}

impl Display for ExitTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitTrigger::Quit => write!(f, "quit"),
            ExitTrigger::AllWindowsClosed => write!(f, "all windows closed"),
            ExitTrigger::Signal(name) => write!(f, "signal {name}"),
            ExitTrigger::Fault(message) => write!(f, "fault: {message}"),
        }
    }
}

/// Cloneable handle for raising exit triggers from anywhere.
#[derive(Debug, Clone)]
pub struct ExitSender {
    tx: mpsc::UnboundedSender<ExitTrigger>,
}

impl ExitSender {
    pub fn trigger(&self, trigger: ExitTrigger) {
        debug!("exit trigger: {trigger}");
        if self.tx.send(trigger).is_err() {
            trace!("exit trigger after shutdown finished");
        }
    }
}

pub struct CrashHandler {
    coordinator: Arc<ShutdownCoordinator>,
    sender: ExitSender,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ExitTrigger>>>,
}

impl CrashHandler {
    pub fn new(coordinator: Arc<ShutdownCoordinator>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            coordinator,
            sender: ExitSender { tx },
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn sender(&self) -> ExitSender {
        self.sender.clone()
    }

    pub fn trigger(&self, trigger: ExitTrigger) {
        self.sender.trigger(trigger);
    }

    /// Install OS signal listeners and a panic hook. Call once per process.
    pub fn install(&self) -> Result<()> {
        self.signals()?;
        self.panic_hook();
        Ok(())
    }

    #[cfg(unix)]
    fn signals(&self) -> Result<()> {
        let signals = [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::quit(), "SIGQUIT"),
            (SignalKind::hangup(), "SIGHUP"),
        ];
        for (signal, name) in signals {
            let mut stream = match tokio::signal::unix::signal(signal) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Failed to register signal handler for {name}: {e}");
                    continue;
                }
            };
            let sender = self.sender();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("received {name}");
                    sender.trigger(ExitTrigger::Signal(name.to_string()));
                }
            });
        }
        Ok(())
    }

    #[cfg(windows)]
    fn signals(&self) -> Result<()> {
        let sender = self.sender();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to wait for ctrl-c: {}", e);
                    return;
                }
                info!("received ctrl-c");
                sender.trigger(ExitTrigger::Signal("ctrl-c".to_string()));
            }
        });
        Ok(())
    }

    fn panic_hook(&self) {
        let sender = self.sender();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let message = match info.payload().downcast_ref::<&str>() {
                Some(s) => s.to_string(),
                None => match info.payload().downcast_ref::<String>() {
                    Some(s) => s.clone(),
                    None => "unknown panic".to_string(),
                },
            };
            let location = info
                .location()
                .map(|l| format!(" at {}:{}", l.file(), l.line()))
                .unwrap_or_default();
            sender.trigger(ExitTrigger::Fault(format!("{message}{location}")));
            previous(info);
        }));
    }

    /// Wait for the first trigger, run the shutdown, and return the exit code.
    ///
    /// Triggers that arrive while shutting down are logged and ignored.
    pub async fn wait(&self) -> i32 {
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(mut rx) = rx else {
            error!("exit triggers are already being awaited");
            return 1;
        };
        let first = rx.recv().await.unwrap_or(ExitTrigger::Quit);
        match &first {
            ExitTrigger::Fault(_) => error!("exiting after {first}"),
            _ => info!("exiting after {first}"),
        }

        let shutdown = self.coordinator.shutdown();
        tokio::pin!(shutdown);
        let report = loop {
            select! {
                report = &mut shutdown => break report,
                Some(trigger) = rx.recv() => {
                    info!("ignoring {trigger}: already shutting down");
                }
            }
        };

        let mut code = first.exit_code();
        if report.has_fatal_failure() {
            for step in report.failed().filter(|s| s.is_fatal) {
                error!(
                    "shutdown step {} failed: {}",
                    step.name,
                    step.error.as_deref().unwrap_or_default()
                );
            }
            code = code.max(1);
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownStep;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_coordinator(runs: Arc<AtomicUsize>, fail: bool) -> Arc<ShutdownCoordinator> {
        let step = ShutdownStep::new("count", move || {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                if fail {
                    miette::bail!("terminate failed");
                }
                Ok(())
            }
        });
        let step = if fail { step.fatal() } else { step };
        Arc::new(ShutdownCoordinator::new(vec![step], Duration::from_secs(1)))
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitTrigger::Quit.exit_code(), 0);
        assert_eq!(ExitTrigger::AllWindowsClosed.exit_code(), 0);
        assert_eq!(ExitTrigger::Signal("SIGTERM".to_string()).exit_code(), 0);
        assert_eq!(ExitTrigger::Fault("boom".to_string()).exit_code(), 1);
    }

    #[tokio::test]
    async fn test_signal_exits_zero() {
        let runs = Arc::new(AtomicUsize::new(0));
        let handler = CrashHandler::new(counting_coordinator(runs.clone(), false));
        handler.trigger(ExitTrigger::Signal("SIGTERM".to_string()));
        assert_eq!(handler.wait().await, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fault_exits_one() {
        let runs = Arc::new(AtomicUsize::new(0));
        let handler = CrashHandler::new(counting_coordinator(runs, false));
        handler.trigger(ExitTrigger::Fault("worker panicked".to_string()));
        assert_eq!(handler.wait().await, 1);
    }

    #[tokio::test]
    async fn test_fatal_step_failure_exits_one() {
        let runs = Arc::new(AtomicUsize::new(0));
        let handler = CrashHandler::new(counting_coordinator(runs, true));
        handler.trigger(ExitTrigger::Quit);
        assert_eq!(handler.wait().await, 1);
    }

    #[tokio::test]
    async fn test_later_triggers_do_not_rerun_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CrashHandler::new(counting_coordinator(runs.clone(), false)));
        let sender = handler.sender();
        sender.trigger(ExitTrigger::AllWindowsClosed);
        sender.trigger(ExitTrigger::Signal("SIGINT".to_string()));
        sender.trigger(ExitTrigger::Fault("late".to_string()));

        assert_eq!(handler.wait().await, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(handler.wait().await, 1, "second wait has no receiver");
    }
}
