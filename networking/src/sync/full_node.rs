/// Full-node sync orchestrator.
///
/// Builds the accounting ledger from a trusted local full node. The
/// orchestrator catches up from the ledger tip to the head of the source,
/// buffers blocks that arrive ahead of the tip, detects reorgs against the
/// tip, and once live applies blocks pushed by the source. Appended blocks
/// are published to peers after the initial catch-up completed and the
/// overlay is ready. Peers asking for blocks are served from the source.
use std::sync::Arc;

use async_trait::async_trait;
use chain::config::MAX_BLOCKS_PER_RESPONSE;
use classifier::classify;
use containers::{AccountingBlock, Height, RawBlock};
use ledger::{AppendOutcome, Ledger, LedgerError, ReorgRecovery};
use metrics::Metrics;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    config::SyncConfig,
    node::{ChainSyncNode, NodeLifecycle},
    pending_blocks::PendingBlocks,
    states::FullNodeState,
};
use crate::req_resp::{AccountingMessage, GetBlocksRequest, GetBlocksResponse, NewBlockBroadcast};
use crate::types::{EventSource, NetworkEvent, NodeAddress, P2pTransport};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("trusted source unreachable: {0}")]
    Unreachable(String),

    #[error("trusted source request failed: {0}")]
    Rpc(String),
}

/// The local full node the ledger is built from.
#[async_trait]
pub trait TrustedSource: Send + Sync + 'static {
    async fn head_height(&self) -> Result<Height, SourceError>;

    async fn raw_block(&self, height: Height) -> Result<RawBlock, SourceError>;
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(
        "trusted source head {head_height} still below ledger height {ledger_height} after {attempts} attempts"
    )]
    SourceNotSynced {
        head_height: Height,
        ledger_height: Height,
        attempts: u32,
    },

    #[error("catch-up made no progress at height {height}")]
    Stalled { height: Height },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl SyncError {
    /// Faults that need operator attention. Source faults and catch-up
    /// passes without progress are transient.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::SourceNotSynced { .. } | SyncError::Ledger(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotification {
    NewBlock(AccountingBlock),
    InitialSyncComplete,
    ReorgDetected { height: Height, resume_from: Height },
    Warning(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockOutcome {
    Appended,
    AlreadyPresent,
    Pending,
    Reorg,
}

pub struct FullNodeSync<S, T, L, R>
where
    S: TrustedSource,
    T: P2pTransport,
    L: Ledger,
    R: ReorgRecovery,
{
    config: SyncConfig,
    state: FullNodeState,
    lifecycle: NodeLifecycle,
    source: Arc<S>,
    transport: Arc<T>,
    ledger: Arc<Mutex<L>>,
    recovery: R,
    pending: PendingBlocks,
    last_requested_height: Height,
    /// Set when the source became unreachable; cleared by `start`.
    halted: bool,
    appended: Vec<RawBlock>,
    notifications: mpsc::UnboundedSender<SyncNotification>,
    metrics: Option<Arc<Metrics>>,
}

impl<S, T, L, R> FullNodeSync<S, T, L, R>
where
    S: TrustedSource,
    T: P2pTransport,
    L: Ledger,
    R: ReorgRecovery,
{
    pub fn new(
        config: SyncConfig,
        source: Arc<S>,
        transport: Arc<T>,
        ledger: Arc<Mutex<L>>,
        recovery: R,
        notifications: mpsc::UnboundedSender<SyncNotification>,
    ) -> Self {
        let last_requested_height = ledger.lock().last_height();
        Self {
            config,
            state: FullNodeState::default(),
            lifecycle: NodeLifecycle::default(),
            source,
            transport,
            ledger,
            recovery,
            pending: PendingBlocks::new(),
            last_requested_height,
            halted: false,
            appended: Vec::new(),
            notifications,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> FullNodeState {
        self.state
    }

    pub fn pending_blocks(&self) -> &PendingBlocks {
        &self.pending
    }

    pub fn last_requested_height(&self) -> Height {
        self.last_requested_height
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Sync the ledger up to the head of the trusted source.
    ///
    /// Returns an error only for fatal faults. An unreachable source halts
    /// the orchestrator with a warning until `start` is called again.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        self.halted = false;
        let result = self.sync_to_head().await;
        self.flush_appended().await;
        self.handle_sync_result(result)
    }

    pub async fn run<P, E>(mut self, mut pushes: P, mut events: E) -> Result<(), SyncError>
    where
        P: EventSource<RawBlock>,
        E: EventSource<NetworkEvent>,
    {
        self.start().await?;

        loop {
            tokio::select! {
                Some(block) = pushes.recv() => self.on_new_raw_block(block).await?,
                Some(event) = events.recv() => self.on_network_event(event).await,
                else => break,
            }
        }

        info!("Full node sync stopped");
        Ok(())
    }

    /// Handle a block pushed by the trusted source.
    pub async fn on_new_raw_block(&mut self, block: RawBlock) -> Result<(), SyncError> {
        if self.halted {
            debug!(height = block.height, "Sync halted, ignoring pushed block");
            return Ok(());
        }

        let height = block.height;
        let outcome = self.process_raw_block(block);
        self.flush_appended().await;

        match outcome {
            Ok(BlockOutcome::Pending) | Ok(BlockOutcome::Reorg) => {
                info!(height, "Pushed block does not extend the ledger, catching up");
                self.start().await
            }
            Ok(BlockOutcome::Appended) | Ok(BlockOutcome::AlreadyPresent) => Ok(()),
            Err(err) => self.handle_sync_result(Err(err)),
        }
    }

    pub async fn on_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Ready => self.on_p2p_network_ready(),
            NetworkEvent::Message {
                peer,
                message: AccountingMessage::GetBlocksRequest(request),
            } => self.on_get_blocks_request(peer, request).await,
            NetworkEvent::Message { peer, message } => {
                debug!(peer = %peer, %message, "Ignoring message");
            }
            event => debug!(%event, "Network event"),
        }
    }

    async fn sync_to_head(&mut self) -> Result<(), SyncError> {
        let mut not_synced_attempts = 0;
        let mut stalled_passes = 0;

        loop {
            let head_height = self.source.head_height().await?;
            let ledger_height = self.ledger.lock().last_height();

            if ledger_height > head_height {
                if not_synced_attempts >= self.config.max_source_not_synced_attempts {
                    return Err(SyncError::SourceNotSynced {
                        head_height,
                        ledger_height,
                        attempts: not_synced_attempts,
                    });
                }
                not_synced_attempts += 1;
                let delay = self.config.source_not_synced_delay(not_synced_attempts);
                warn!(
                    head_height,
                    ledger_height,
                    attempt = not_synced_attempts,
                    delay_secs = delay.as_secs(),
                    "Trusted source is behind the ledger, waiting for it to sync"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if ledger_height == head_height {
                self.transition(FullNodeState::Live);
                if !self.lifecycle.initial_block_requests_complete {
                    self.on_initial_block_requests_complete();
                    self.notify(SyncNotification::InitialSyncComplete);
                }
                return Ok(());
            }

            self.transition(FullNodeState::CatchingUp);
            info!(
                from = ledger_height + 1,
                to = head_height,
                "Catching up with trusted source"
            );

            if self.catch_up(head_height).await? {
                stalled_passes = 0;
                continue;
            }

            stalled_passes += 1;
            if stalled_passes >= self.config.max_stalled_passes {
                return Err(SyncError::Stalled {
                    height: ledger_height + 1,
                });
            }
            debug!(
                height = ledger_height + 1,
                pass = stalled_passes,
                lowest_pending = ?self.pending.lowest_height(),
                "Catch-up pass made no progress, requesting again"
            );
        }
    }

    /// Request every height up to `head_height` once. Returns whether the
    /// ledger changed.
    async fn catch_up(&mut self, head_height: Height) -> Result<bool, SyncError> {
        self.last_requested_height = self.ledger.lock().last_height();
        let mut progressed = false;

        while self.last_requested_height < head_height {
            let height = self.last_requested_height + 1;
            self.last_requested_height = height;

            let block = self.source.raw_block(height).await?;
            let outcome = self.process_raw_block(block)?;
            self.flush_appended().await;

            match outcome {
                BlockOutcome::Appended => progressed = true,
                // Start a fresh pass from the recovered tip.
                BlockOutcome::Reorg => return Ok(true),
                BlockOutcome::AlreadyPresent | BlockOutcome::Pending => {}
            }

            let ledger_height = self.ledger.lock().last_height();
            self.last_requested_height = self.last_requested_height.max(ledger_height);
        }

        Ok(progressed)
    }

    fn process_raw_block(&mut self, block: RawBlock) -> Result<BlockOutcome, SyncError> {
        let mut outcome = self.apply_raw_block(block)?;
        if outcome == BlockOutcome::Appended && self.drain_pending()? == BlockOutcome::Reorg {
            outcome = BlockOutcome::Reorg;
        }
        self.record(|metrics| metrics.set_pending_blocks(self.pending.len() as i64));
        Ok(outcome)
    }

    /// Apply buffered blocks for as long as they extend the ledger. Returns
    /// the outcome of the last buffered block applied, `Appended` if none was.
    fn drain_pending(&mut self) -> Result<BlockOutcome, SyncError> {
        let mut outcome = BlockOutcome::Appended;
        while outcome == BlockOutcome::Appended {
            let next_height = self.ledger.lock().last_height().saturating_add(1);
            let Some(block) = self.pending.take(next_height) else {
                break;
            };
            debug!(height = next_height, "Applying buffered block");
            outcome = self.apply_raw_block(block)?;
        }

        let tip_height = self.ledger.lock().last_height();
        self.pending.prune_up_to(tip_height);
        Ok(outcome)
    }

    fn apply_raw_block(&mut self, raw_block: RawBlock) -> Result<BlockOutcome, SyncError> {
        let ledger_handle = Arc::clone(&self.ledger);
        let mut ledger = ledger_handle.lock();

        let expected_height = ledger.last_height().saturating_add(1);
        if raw_block.height > expected_height {
            debug!(
                height = raw_block.height,
                expected_height, "Buffering block ahead of ledger tip"
            );
            self.pending.insert(raw_block);
            return Ok(BlockOutcome::Pending);
        }

        let block = classify(&raw_block, ledger.receivers(), ledger.genesis_tx_id());

        match ledger.append(block.clone()) {
            Ok(AppendOutcome::AlreadyPresent) => Ok(BlockOutcome::AlreadyPresent),
            Ok(AppendOutcome::Appended) => {
                drop(ledger);
                self.on_block_appended(raw_block, block);
                Ok(BlockOutcome::Appended)
            }
            Err(LedgerError::HashNotConnecting { height, .. }) => {
                warn!(height, "Block does not connect to ledger tip, reorg detected");
                self.pending.clear();
                let resume_from = self.recovery.recover(&mut *ledger);
                drop(ledger);

                self.last_requested_height = resume_from;
                self.record(|metrics| {
                    metrics.inc_reorgs();
                    metrics.set_ledger_height(i64::from(resume_from));
                });
                self.notify(SyncNotification::ReorgDetected {
                    height,
                    resume_from,
                });
                Ok(BlockOutcome::Reorg)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn on_block_appended(&mut self, raw_block: RawBlock, block: AccountingBlock) {
        self.record(|metrics| {
            metrics.inc_blocks_appended();
            metrics.set_ledger_height(i64::from(block.height));
            for tx in &block.txs {
                metrics.inc_txs(tx.tx_type.as_str());
            }
        });
        self.appended.push(raw_block);
        self.notify(SyncNotification::NewBlock(block));
    }

    async fn flush_appended(&mut self) {
        let appended = std::mem::take(&mut self.appended);
        if !self.can_publish() {
            return;
        }

        for block in appended {
            let height = block.height;
            let message = AccountingMessage::NewBlockBroadcast(NewBlockBroadcast { block });
            if let Err(err) = self.transport.broadcast(message, None).await {
                warn!(height, %err, "Failed to publish block");
            }
        }
    }

    async fn on_get_blocks_request(&mut self, peer: NodeAddress, request: GetBlocksRequest) {
        let (earliest_height, tip_height) = {
            let ledger = self.ledger.lock();
            (ledger.earliest_block_height(), ledger.last_height())
        };

        let from_height = request.from_height.max(earliest_height);
        let to_height = tip_height.min(
            from_height.saturating_add(MAX_BLOCKS_PER_RESPONSE as Height - 1),
        );

        let mut blocks = Vec::new();
        for height in from_height..=to_height {
            match self.source.raw_block(height).await {
                Ok(block) => blocks.push(block),
                Err(err) => {
                    warn!(height, %err, "Could not load block requested by peer");
                    break;
                }
            }
        }

        debug!(
            peer = %peer,
            from_height,
            num_blocks = blocks.len(),
            "Serving GetBlocksRequest"
        );

        let response = AccountingMessage::GetBlocksResponse(GetBlocksResponse {
            nonce: request.nonce,
            blocks,
        });
        if let Err(err) = self.transport.send(&peer, response).await {
            warn!(peer = %peer, %err, "Failed to send GetBlocksResponse");
        }
    }

    fn handle_sync_result(&mut self, result: Result<(), SyncError>) -> Result<(), SyncError> {
        match result {
            Ok(()) => Ok(()),
            Err(SyncError::Source(SourceError::Unreachable(reason))) => {
                warn!(%reason, "Trusted source unreachable, sync halted until restart");
                self.halted = true;
                self.notify(SyncNotification::Warning(format!(
                    "Trusted source unreachable: {reason}"
                )));
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                error!(%err, "Full node sync failed");
                self.notify(SyncNotification::Error(err.to_string()));
                Err(err)
            }
            Err(err) => {
                error!(%err, "Full node sync fault");
                self.notify(SyncNotification::Error(err.to_string()));
                Ok(())
            }
        }
    }

    fn transition(&mut self, target: FullNodeState) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(target) {
            warn!(from = ?self.state, to = ?target, "Invalid state transition attempted");
            return;
        }
        info!(from = ?self.state, to = ?target, "Full node state transition");
        self.state = target;
    }

    fn notify(&self, notification: SyncNotification) {
        if self.notifications.send(notification).is_err() {
            debug!("Sync notification receiver dropped");
        }
    }

    fn record(&self, f: impl FnOnce(&Metrics)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

impl<S, T, L, R> ChainSyncNode for FullNodeSync<S, T, L, R>
where
    S: TrustedSource,
    T: P2pTransport,
    L: Ledger,
    R: ReorgRecovery,
{
    fn lifecycle(&self) -> &NodeLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut NodeLifecycle {
        &mut self.lifecycle
    }
}
