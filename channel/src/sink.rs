use std::fs;
use std::path::PathBuf;

use state_boc::StateRoot;
use tracing::info;

use crate::error::{ChannelError, ChannelResult};

/// Receives the final framed snapshot of a settled channel. What happens next (anchoring on
/// a ledger, archiving) is up to the implementation.
pub trait SettlementSink {
    fn submit(&mut self, root: &StateRoot, snapshot: &[u8]) -> ChannelResult<()>;
}

#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub submissions: Vec<(StateRoot, Vec<u8>)>,
}

impl SettlementSink for MemorySink {
    fn submit(&mut self, root: &StateRoot, snapshot: &[u8]) -> ChannelResult<()> {
        self.submissions.push((*root, snapshot.to_vec()));
        Ok(())
    }
}

/// Writes each settlement to `<dir>/<root hex>.boc`.
#[derive(Clone, Debug)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SettlementSink for FileSink {
    fn submit(&mut self, root: &StateRoot, snapshot: &[u8]) -> ChannelResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.boc", hex::encode(root)));
        if path.exists() {
            return Err(ChannelError::Sink(format!("{} already exists", path.display())));
        }
        fs::write(&path, snapshot)?;
        info!(path = %path.display(), "settlement snapshot written");
        Ok(())
    }
}
