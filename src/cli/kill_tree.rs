use crate::Result;
use crate::procs::ProcessTreeTerminator;

/// Force-kill a process and all of its descendants
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct KillTree {
    /// Root of the tree
    pid: u32,
}

impl KillTree {
    pub async fn run(&self) -> Result<()> {
        ProcessTreeTerminator::platform()
            .terminate_tree_async(self.pid)
            .await?;
        info!("killed process tree of {}", self.pid);
        Ok(())
    }
}
