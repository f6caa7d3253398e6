use crate::Result;
use crate::app;
use crate::gui::HeadlessShell;
use crate::settings::{Mode, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Start the daemon and frontend and supervise them until exit
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Start the daemon and frontend and supervise them until exit

Only one instance runs per app id. Launching a second one focuses the
first and exits. SIGINT, SIGTERM or 'appwarden stop' shut everything down.

Examples:
  appwarden run                 Packaged daemon, embedded frontend
  appwarden run --dev           Run both from source using dev commands
  appwarden run --home /tmp/w   Use /tmp/w as the daemon's home"
)]
pub struct Run {
    /// Run the daemon and frontend from source
    #[clap(long)]
    dev: bool,
    /// Home directory passed to the daemon
    #[clap(long)]
    home: Option<PathBuf>,
}

impl Run {
    pub async fn run(&self, config: Option<&Path>) -> Result<()> {
        let mut settings = Settings::load(config)?;
        if self.dev {
            settings.app.mode = Mode::Development;
        }
        if let Some(home) = &self.home {
            settings.app.home = Some(home.clone());
        }
        let code = app::run(Arc::new(settings), Arc::new(HeadlessShell)).await?;
        if code != 0 {
            std::process::exit(code);
        }
        Ok(())
    }
}
