//! Interface to the GUI shell.
//!
//! The desktop shell embedding the supervisor implements [`GuiShell`]; the
//! `appwarden` binary runs with [`HeadlessShell`], which only logs.

use crate::Result;
use crate::supervisor::Ports;

pub trait GuiShell: Send + Sync {
    /// Both processes are ready; show the main window pointed at the frontend.
    fn present(&self, ports: &Ports);

    /// A second instance was started; bring the main window to the front.
    fn focus_main_window(&self);

    /// Close the tray icon, splash screen and main window.
    fn teardown(&self) -> Result<()>;

    /// Show an unrecoverable startup error to the user.
    fn notify_fatal(&self, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessShell;

impl GuiShell for HeadlessShell {
    fn present(&self, ports: &Ports) {
        info!(
            "ready: frontend at http://localhost:{} (daemon on port {})",
            ports.frontend, ports.daemon
        );
    }

    fn focus_main_window(&self) {
        info!("another instance asked for focus");
    }

    fn teardown(&self) -> Result<()> {
        debug!("no windows to tear down");
        Ok(())
    }

    fn notify_fatal(&self, message: &str) {
        error!("{message}");
    }
}
