use crate::Result;
use crate::ipc::{InstanceClient, socket_path};
use crate::settings::Settings;
use std::path::Path;

/// Ask the running instance to shut down
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "quit",
    verbatim_doc_comment,
    long_about = "\
Ask the running instance to shut down

Sends Quit over the instance socket. The instance runs its full shutdown
sequence; use 'appwarden status' to see when it is gone."
)]
pub struct Stop {}

impl Stop {
    pub async fn run(&self, config: Option<&Path>) -> Result<()> {
        let settings = Settings::load(config)?;
        let path = socket_path(&settings.state_dir(), &settings.app.id);
        let mut client = InstanceClient::connect_with_attempts(&path, 1).await?;
        client.quit().await?;
        info!("asked {} to quit", settings.app.id);
        Ok(())
    }
}
