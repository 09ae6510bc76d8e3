/// Feeds blocks received by the lite node into the ledger.
///
/// Requested batches are classified and appended, and the next batch is
/// requested right after. An empty batch means the node is caught up. A block
/// that does not connect to the tip purges recent blocks, resets the lite
/// node and requests again from the recovered tip.
use std::sync::Arc;

use anyhow::Result;
use classifier::classify;
use containers::{Height, RawBlock};
use ledger::{AppendOutcome, BalanceModel, Ledger, LedgerError, ReorgRecovery};
use networking::sync::{LiteNodeHandle, LiteNodeNotification};
use networking::types::EventSource;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Appended,
    Ignored,
    /// The ledger tip changed underneath; a new request was issued.
    Restarted,
}

pub struct LiteLedgerWriter<L: Ledger, R: ReorgRecovery> {
    ledger: Arc<Mutex<L>>,
    recovery: R,
    sync: LiteNodeHandle,
    balances: BalanceModel,
}

impl<L: Ledger, R: ReorgRecovery> LiteLedgerWriter<L, R> {
    pub fn new(ledger: Arc<Mutex<L>>, recovery: R, sync: LiteNodeHandle) -> Self {
        let balances = BalanceModel::from_blocks(
            ledger
                .lock()
                .blocks_at_least_with_height(Height::MIN)
                .iter(),
        );
        Self {
            ledger,
            recovery,
            sync,
            balances,
        }
    }

    pub fn balances(&self) -> &BalanceModel {
        &self.balances
    }

    /// Request blocks from just above the ledger tip.
    pub fn request_next(&self) -> Result<()> {
        let start_height = self.ledger.lock().last_height() + 1;
        debug!(start_height, "Requesting next batch of blocks");
        self.sync.request_blocks(start_height)
    }

    pub async fn run<E>(mut self, mut notifications: E) -> Result<()>
    where
        E: EventSource<LiteNodeNotification>,
    {
        self.request_next()?;
        while let Some(notification) = notifications.recv().await {
            self.on_notification(notification)?;
        }
        Ok(())
    }

    pub fn on_notification(&mut self, notification: LiteNodeNotification) -> Result<()> {
        match notification {
            LiteNodeNotification::RequestedBlocksReceived {
                peer,
                start_height,
                blocks,
            } => {
                debug!(peer = %peer, start_height, num_blocks = blocks.len(), "Blocks received");
                self.on_requested_blocks(blocks)
            }
            LiteNodeNotification::NewBlockReceived(block) => {
                let next_height = self.ledger.lock().last_height() + 1;
                if block.height > next_height {
                    debug!(height = block.height, next_height, "Broadcast block ahead of ledger");
                    return self.request_next();
                }
                self.apply(block).map(|_| ())
            }
            LiteNodeNotification::NoSeedNodeAvailable => {
                warn!("No seed node available, waiting for connectivity");
                Ok(())
            }
            LiteNodeNotification::Fault { message, peer } => {
                warn!(?peer, %message, "Lite node sync fault");
                Ok(())
            }
        }
    }

    fn on_requested_blocks(&mut self, blocks: Vec<RawBlock>) -> Result<()> {
        if blocks.is_empty() {
            let last_height = self.ledger.lock().last_height();
            let balances = self.balances();
            info!(
                last_height,
                distributed_btc = balances.total_distributed_btc(),
                trade_fees = balances.total_distributed_btc_fees(),
                dpt_payouts = balances.total_distributed_dpt(),
                months = balances.distributed_by_month().len(),
                "Ledger caught up with seed node"
            );
            return Ok(());
        }

        for block in blocks {
            if self.apply(block)? == Applied::Restarted {
                return Ok(());
            }
        }
        self.request_next()
    }

    fn apply(&mut self, raw_block: RawBlock) -> Result<Applied> {
        let height = raw_block.height;
        let mut ledger = self.ledger.lock();
        let block = classify(&raw_block, ledger.receivers(), ledger.genesis_tx_id());

        match ledger.append(block.clone()) {
            Ok(AppendOutcome::Appended) => {
                drop(ledger);
                if !block.txs.is_empty() {
                    info!(height, num_txs = block.txs.len(), "Accounting txs received");
                }
                self.balances.add_block(&block);
                Ok(Applied::Appended)
            }
            Ok(AppendOutcome::AlreadyPresent) => Ok(Applied::Ignored),
            Err(LedgerError::HashNotConnecting { .. }) => {
                warn!(height, "Received block does not connect to ledger tip");
                self.recovery.recover(&mut *ledger);
                self.balances =
                    BalanceModel::from_blocks(ledger.blocks_at_least_with_height(Height::MIN));
                drop(ledger);
                self.sync.reset()?;
                self.request_next()?;
                Ok(Applied::Restarted)
            }
            Err(err @ LedgerError::HeightNotConnecting { .. }) => {
                drop(ledger);
                warn!(%err, "Gap in received blocks");
                self.request_next()?;
                Ok(Applied::Restarted)
            }
        }
    }
}
