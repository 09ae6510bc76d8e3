use containers::Height;
use tracing::warn;

use crate::Ledger;

/// Resolves a chain discontinuity detected during sync. Returns the ledger
/// height sync should resume from.
pub trait ReorgRecovery: Send {
    fn recover(&mut self, ledger: &mut dyn Ledger) -> Height;
}

/// Drops the most recent blocks so that sync re-fetches them from the new
/// chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeRecentBlocks {
    pub depth: usize,
}

impl PurgeRecentBlocks {
    pub fn new(depth: usize) -> Self {
        Self { depth }
    }
}

impl Default for PurgeRecentBlocks {
    fn default() -> Self {
        Self::new(chain::config::REORG_PURGE_DEPTH)
    }
}

impl ReorgRecovery for PurgeRecentBlocks {
    fn recover(&mut self, ledger: &mut dyn Ledger) -> Height {
        let purged = ledger.purge_last_blocks(self.depth);
        let last_height = ledger.last_height();
        warn!(
            num_purged = purged.len(),
            last_height, "Purged recent accounting blocks after reorg"
        );
        last_height
    }
}
