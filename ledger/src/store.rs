use chain::ChainConfig;
use containers::{AccountingBlock, Height, ReceiverRegistry, TxId};
use tracing::{debug, info};

use crate::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The block is at or below the tip and was ignored.
    AlreadyPresent,
}

/// Append-only store of accounting blocks.
///
/// Heights are contiguous: every stored block connects to the one before it.
/// With no blocks stored, `last_height` is one below the earliest height so
/// that the next height to fetch is always `last_height + 1`.
pub trait Ledger: Send {
    fn append(&mut self, block: AccountingBlock) -> Result<AppendOutcome, LedgerError>;

    fn last_block(&self) -> Option<&AccountingBlock>;

    fn last_height(&self) -> Height;

    fn block_at_height(&self, height: Height) -> Option<&AccountingBlock>;

    /// Blocks with `height >= min_height`, in ascending order.
    fn blocks_at_least_with_height(&self, min_height: Height) -> &[AccountingBlock];

    /// Remove up to `count` blocks from the tip and return them, oldest first.
    fn purge_last_blocks(&mut self, count: usize) -> Vec<AccountingBlock>;

    fn receivers(&self) -> &ReceiverRegistry;

    fn genesis_tx_id(&self) -> &TxId;

    fn earliest_block_height(&self) -> Height;
}

#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    blocks: Vec<AccountingBlock>,
    receivers: ReceiverRegistry,
    genesis_tx_id: TxId,
    earliest_block_height: Height,
}

impl InMemoryLedger {
    pub fn new(config: &ChainConfig, receivers: ReceiverRegistry, genesis_tx_id: TxId) -> Self {
        Self {
            blocks: Vec::new(),
            receivers,
            genesis_tx_id,
            earliest_block_height: config.earliest_block_height,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[AccountingBlock] {
        &self.blocks
    }

    fn index_of(&self, height: Height) -> Option<usize> {
        let index = height.checked_sub(self.blocks.first()?.height)?;
        let index = usize::try_from(index).ok()?;
        (index < self.blocks.len()).then_some(index)
    }
}

impl Ledger for InMemoryLedger {
    fn append(&mut self, block: AccountingBlock) -> Result<AppendOutcome, LedgerError> {
        let last_height = self.last_height();

        if block.height <= last_height {
            debug!(height = block.height, last_height, "Block already in ledger");
            return Ok(AppendOutcome::AlreadyPresent);
        }

        match self.blocks.last() {
            Some(tip) => {
                if !block.height_connects_to(tip) {
                    return Err(LedgerError::HeightNotConnecting {
                        height: block.height,
                        last_height,
                    });
                }
                if !block.hash_connects_to(tip) {
                    return Err(LedgerError::HashNotConnecting {
                        height: block.height,
                        previous_hash: block.truncated_previous_block_hash,
                        tip_hash: tip.truncated_hash,
                    });
                }
            }
            None if block.height != self.earliest_block_height => {
                return Err(LedgerError::HeightNotConnecting {
                    height: block.height,
                    last_height,
                });
            }
            None => {}
        }

        if !block.txs.is_empty() {
            info!(
                height = block.height,
                num_txs = block.txs.len(),
                "Appended accounting block"
            );
        }
        self.blocks.push(block);
        Ok(AppendOutcome::Appended)
    }

    fn last_block(&self) -> Option<&AccountingBlock> {
        self.blocks.last()
    }

    fn last_height(&self) -> Height {
        self.blocks
            .last()
            .map(|block| block.height)
            .unwrap_or_else(|| self.earliest_block_height.saturating_sub(1))
    }

    fn block_at_height(&self, height: Height) -> Option<&AccountingBlock> {
        self.index_of(height).map(|index| &self.blocks[index])
    }

    fn blocks_at_least_with_height(&self, min_height: Height) -> &[AccountingBlock] {
        let start = self
            .blocks
            .partition_point(|block| block.height < min_height);
        &self.blocks[start..]
    }

    fn purge_last_blocks(&mut self, count: usize) -> Vec<AccountingBlock> {
        let keep = self.blocks.len().saturating_sub(count);
        self.blocks.split_off(keep)
    }

    fn receivers(&self) -> &ReceiverRegistry {
        &self.receivers
    }

    fn genesis_tx_id(&self) -> &TxId {
        &self.genesis_tx_id
    }

    fn earliest_block_height(&self) -> Height {
        self.earliest_block_height
    }
}
