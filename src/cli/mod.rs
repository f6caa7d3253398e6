use crate::Result;
use clap::Parser;
use std::path::PathBuf;

mod kill_tree;
mod port;
mod run;
mod status;
mod stop;

#[derive(Debug, clap::Parser)]
#[clap(name = "appwarden", version, about = "Supervises the daemon and frontend of a desktop app")]
struct Cli {
    /// Path to config.toml
    #[clap(long, global = true, env = "APPWARDEN_CONFIG")]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    KillTree(kill_tree::KillTree),
    Port(port::Port),
    Run(run::Run),
    Status(status::Status),
    Stop(stop::Stop),
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    let config = args.config.as_deref();
    match args.command {
        Command::KillTree(kill_tree) => kill_tree.run().await,
        Command::Port(port) => port.run().await,
        Command::Run(run) => run.run(config).await,
        Command::Status(status) => status.run(config).await,
        Command::Stop(stop) => stop.run(config).await,
    }
}
