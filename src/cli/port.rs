use crate::Result;
use crate::ports::{PortAllocator, PortRange};

/// Print the lowest free TCP port in a range
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Print the lowest free TCP port in a range

Ports are checked by binding on 127.0.0.1. The range is inclusive.

Examples:
  appwarden port 8765 8799
  appwarden port 3000 3099 -x 3000 -x 3001"
)]
pub struct Port {
    /// First port to try
    start: u16,
    /// Last port to try
    end: u16,
    /// Skip this port even if it is free
    #[clap(short = 'x', long = "exclude")]
    exclude: Vec<u16>,
}

impl Port {
    pub async fn run(&self) -> Result<()> {
        let range = PortRange::new(self.start, self.end)?.excluding(self.exclude.iter().copied());
        let port = PortAllocator::new().find_available_port(&range).await?;
        println!("{port}");
        Ok(())
    }
}
