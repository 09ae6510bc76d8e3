use std::collections::BTreeMap;

use containers::{Height, RawBlock};

/// Raw blocks that arrived ahead of the ledger tip, keyed by height.
///
/// The trusted source may deliver blocks out of order. Future blocks wait here
/// until the ledger reaches the height just below them.
#[derive(Debug, Default, Clone)]
pub struct PendingBlocks {
    blocks: BTreeMap<Height, RawBlock>,
}

impl PendingBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a block. A later block at the same height replaces the earlier one.
    pub fn insert(&mut self, block: RawBlock) {
        self.blocks.insert(block.height, block);
    }

    pub fn take(&mut self, height: Height) -> Option<RawBlock> {
        self.blocks.remove(&height)
    }

    pub fn lowest_height(&self) -> Option<Height> {
        self.blocks.keys().next().copied()
    }

    /// Drop every buffered block at or below `height`.
    pub fn prune_up_to(&mut self, height: Height) {
        self.blocks = self.blocks.split_off(&height.saturating_add(1));
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
