#[macro_use]
extern crate log;

mod app;
mod cli;
mod crash;
mod daemon_client;
mod env;
mod error;
mod gui;
mod instance;
mod ipc;
mod logger;
mod managed_process;
mod ports;
mod procs;
mod ready_state;
mod readiness;
mod settings;
mod shutdown;
mod state_file;
mod supervisor;
mod web;

pub use miette::Result;
#[cfg(unix)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::SignalKind;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    #[cfg(unix)]
    handle_epipe();
    cli::run().await
}

#[cfg(unix)]
fn handle_epipe() {
    match signal::unix::signal(SignalKind::pipe()) {
        Ok(mut pipe_stream) => {
            tokio::spawn(async move {
                pipe_stream.recv().await;
                debug!("received SIGPIPE");
            });
        }
        Err(e) => {
            warn!("Could not set up SIGPIPE handler: {e}");
        }
    }
}
