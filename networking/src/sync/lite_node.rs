/// Lite-node sync service.
///
/// Requests raw blocks from seed nodes through one-shot block request
/// handlers, retries with a fresh seed node on failure, and relays new-block
/// broadcasts from peers. Received blocks are handed to the caller, which
/// classifies them into its ledger and asks for the next batch.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chain::ChainConfig;
use containers::{Height, RawBlock};
use metrics::Metrics;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    config::SyncConfig,
    node::{ChainSyncNode, NodeLifecycle},
    peer_manager::SeedNodeSelector,
    request_handler::{BlockRequestHandler, RequestCompletion, RequestHandle},
};
use crate::req_resp::{AccountingMessage, GetBlocksResponse, NewBlockBroadcast};
use crate::types::{CloseReason, EventSource, NetworkEvent, NodeAddress, P2pTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteNodeNotification {
    RequestedBlocksReceived {
        peer: NodeAddress,
        start_height: Height,
        blocks: Vec<RawBlock>,
    },
    NewBlockReceived(RawBlock),
    NoSeedNodeAvailable,
    Fault {
        message: String,
        peer: Option<NodeAddress>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteNodeCommand {
    RequestBlocks { start_height: Height },
    Reset,
}

/// Cloneable handle for sending commands to a running `LiteNodeSync`.
#[derive(Debug, Clone)]
pub struct LiteNodeHandle {
    commands: mpsc::UnboundedSender<LiteNodeCommand>,
}

impl LiteNodeHandle {
    pub fn new(commands: mpsc::UnboundedSender<LiteNodeCommand>) -> Self {
        Self { commands }
    }

    pub fn request_blocks(&self, start_height: Height) -> Result<()> {
        self.send(LiteNodeCommand::RequestBlocks { start_height })
    }

    pub fn reset(&self) -> Result<()> {
        self.send(LiteNodeCommand::Reset)
    }

    fn send(&self, command: LiteNodeCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|err| anyhow!("lite node sync is not running: {err}"))
    }
}

/// At most one request per peer and start height.
type RequestKey = (NodeAddress, Height);

#[derive(Debug)]
enum InternalEvent {
    RequestCompleted(RequestCompletion),
    RetryTimerFired { generation: u64 },
    CleanupTimerFired { key: RequestKey, id: u64 },
}

pub struct LiteNodeSync<T: P2pTransport> {
    config: SyncConfig,
    earliest_block_height: Height,
    transport: Arc<T>,
    lifecycle: NodeLifecycle,
    seeds: SeedNodeSelector,
    requests: HashMap<RequestKey, RequestHandle>,
    next_id: u64,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    retry_timer: Option<(u64, JoinHandle<()>)>,
    retry_attempts: u32,
    retries_exhausted: bool,
    last_requested_height: Option<Height>,
    last_received_height: Height,
    seen_broadcasts: HashSet<[u8; 32]>,
    notifications: mpsc::UnboundedSender<LiteNodeNotification>,
    metrics: Option<Arc<Metrics>>,
}

impl<T: P2pTransport> LiteNodeSync<T> {
    pub fn new(
        config: SyncConfig,
        chain: &ChainConfig,
        transport: Arc<T>,
        seed_nodes: Vec<NodeAddress>,
        notifications: mpsc::UnboundedSender<LiteNodeNotification>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            config,
            earliest_block_height: chain.earliest_block_height,
            transport,
            lifecycle: NodeLifecycle::default(),
            seeds: SeedNodeSelector::new(seed_nodes),
            requests: HashMap::new(),
            next_id: 0,
            internal_tx,
            internal_rx,
            retry_timer: None,
            retry_attempts: 0,
            retries_exhausted: false,
            last_requested_height: None,
            last_received_height: 0,
            seen_broadcasts: HashSet::new(),
            notifications,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn requests_in_flight(&self) -> usize {
        self.requests.len()
    }

    pub fn has_request(&self, peer: &NodeAddress, start_height: Height) -> bool {
        self.requests.contains_key(&(peer.clone(), start_height))
    }

    pub fn last_requested_height(&self) -> Option<Height> {
        self.last_requested_height
    }

    pub fn last_received_height(&self) -> Height {
        self.last_received_height
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn is_retry_scheduled(&self) -> bool {
        self.retry_timer.is_some()
    }

    pub fn seed_nodes(&self) -> &[NodeAddress] {
        self.seeds.seed_nodes()
    }

    pub async fn run<E>(mut self, mut events: E, mut commands: mpsc::UnboundedReceiver<LiteNodeCommand>)
    where
        E: EventSource<NetworkEvent>,
    {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.on_network_event(event).await,
                    None => break,
                },
                Some(command) = commands.recv() => self.on_command(command),
                Some(event) = self.internal_rx.recv() => self.on_internal_event(event),
            }
        }

        self.close_all_handlers();
        self.stop_retry_timer();
        info!("Lite node sync stopped");
    }

    /// Wait for the next timer or request completion and handle it.
    pub async fn process_next_internal_event(&mut self) {
        if let Some(event) = self.internal_rx.recv().await {
            self.on_internal_event(event);
        }
    }

    pub fn on_command(&mut self, command: LiteNodeCommand) {
        match command {
            LiteNodeCommand::RequestBlocks { start_height } => self.request_blocks(start_height),
            LiteNodeCommand::Reset => self.reset(),
        }
    }

    /// Request blocks from `start_height` on from a freshly selected seed node.
    pub fn request_blocks(&mut self, start_height: Height) {
        debug_assert!(
            start_height >= self.earliest_block_height,
            "start height {start_height} below earliest block height {}",
            self.earliest_block_height
        );
        if start_height < self.earliest_block_height {
            error!(
                start_height,
                earliest_block_height = self.earliest_block_height,
                "Ignoring request below earliest block height"
            );
            return;
        }

        self.last_requested_height = Some(start_height);

        match self.seeds.select(self.transport.as_ref()) {
            Some(peer) => self.request_from(peer, start_height),
            None => {
                debug!(start_height, "No seed node available to request blocks from");
                self.schedule_retry();
            }
        }
    }

    /// Stop all requests and timers and forget the sync cursors.
    pub fn reset(&mut self) {
        info!("Resetting lite node sync");
        self.close_all_handlers();
        self.stop_retry_timer();
        self.last_requested_height = None;
        self.last_received_height = 0;
        self.retry_attempts = 0;
        self.retries_exhausted = false;
        self.seeds.reset();
    }

    pub async fn on_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Ready => self.on_p2p_network_ready(),
            NetworkEvent::Connected(peer) => self.on_connected(peer),
            NetworkEvent::Disconnected { peer, reason } => self.on_disconnected(peer, reason),
            NetworkEvent::AllConnectionsLost => {
                info!("All connections lost");
                self.close_all_handlers();
                self.stop_retry_timer();
                self.restart();
            }
            NetworkEvent::NewConnectionAfterAllLost | NetworkEvent::AwakeFromStandby => {
                info!(%event, "Connectivity restored, restarting block requests");
                self.close_all_handlers();
                self.stop_retry_timer();
                self.restart_with_fresh_seeds();
            }
            NetworkEvent::Message { peer, message } => match message {
                AccountingMessage::GetBlocksResponse(response) => {
                    self.on_get_blocks_response(&peer, response)
                }
                AccountingMessage::NewBlockBroadcast(NewBlockBroadcast { block }) => {
                    self.on_new_block_broadcast(peer, block).await
                }
                AccountingMessage::GetBlocksRequest(request) => {
                    debug!(
                        peer = %peer,
                        from_height = request.from_height,
                        "Lite node does not serve blocks"
                    );
                }
            },
        }
    }

    fn restart(&mut self) {
        if let Some(start_height) = self.last_requested_height {
            self.request_blocks(start_height);
        }
    }

    /// Seeds that failed earlier become eligible again.
    fn restart_with_fresh_seeds(&mut self) {
        self.retry_attempts = 0;
        self.retries_exhausted = false;
        self.seeds.reset();
        self.restart();
    }

    fn request_from(&mut self, peer: NodeAddress, start_height: Height) {
        let key = (peer.clone(), start_height);
        if let Some(existing) = self.requests.get(&key) {
            warn!(
                peer = %peer,
                start_height,
                "Request already in flight, scheduling cleanup"
            );
            self.schedule_cleanup(key, existing.id());
            return;
        }

        let id = self.next_id();
        let (handler, responses) = BlockRequestHandler::new(
            Arc::clone(&self.transport),
            peer.clone(),
            start_height,
            self.config.request_timeout,
        );
        let internal_tx = self.internal_tx.clone();
        let handle = RequestHandle::spawn(
            id,
            peer,
            start_height,
            handler,
            responses,
            move |completion| {
                let _ = internal_tx.send(InternalEvent::RequestCompleted(completion));
            },
        );

        self.requests.insert(key, handle);
        self.update_in_flight_metric();
    }

    fn on_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::RequestCompleted(completion) => self.on_request_completed(completion),
            InternalEvent::RetryTimerFired { generation } => self.on_retry_timer(generation),
            InternalEvent::CleanupTimerFired { key, id } => self.on_cleanup_timer(key, id),
        }
    }

    fn on_request_completed(&mut self, completion: RequestCompletion) {
        let RequestCompletion {
            id,
            peer,
            start_height,
            result,
        } = completion;
        let key = (peer, start_height);

        if !self.requests.get(&key).is_some_and(|handle| handle.id() == id) {
            debug!(peer = %key.0, start_height, "Ignoring completion of stopped request");
            return;
        }
        // Removed before notifying so the next request for the same key is accepted.
        self.requests.remove(&key);
        self.update_in_flight_metric();
        let (peer, start_height) = key;

        match result {
            Ok(response) => {
                self.stop_retry_timer();
                self.retry_attempts = 0;
                self.retries_exhausted = false;

                if start_height < self.last_received_height {
                    debug!(
                        peer = %peer,
                        start_height,
                        last_received_height = self.last_received_height,
                        "Dropping stale response"
                    );
                    return;
                }
                self.last_received_height = start_height;

                if response.blocks.is_empty() {
                    self.on_initial_block_requests_complete();
                }

                self.notify(LiteNodeNotification::RequestedBlocksReceived {
                    peer,
                    start_height,
                    blocks: response.blocks,
                });
            }
            Err(fault) => {
                warn!(peer = %peer, start_height, %fault, "Block request failed");
                self.record(|metrics| metrics.inc_request_fault(fault.reason()));
                self.seeds.mark_failed(&peer);
                self.notify(LiteNodeNotification::Fault {
                    message: fault.to_string(),
                    peer: Some(peer),
                });
                self.request_blocks(start_height);
            }
        }
    }

    fn on_get_blocks_response(&mut self, peer: &NodeAddress, response: GetBlocksResponse) {
        let mut delivered = false;
        for handle in self.requests.values().filter(|handle| handle.peer() == peer) {
            handle.deliver(response.clone());
            delivered = true;
        }
        if !delivered {
            debug!(peer = %peer, nonce = response.nonce, "Unsolicited GetBlocksResponse");
        }
    }

    async fn on_new_block_broadcast(&mut self, peer: NodeAddress, block: RawBlock) {
        if !self.seen_broadcasts.insert(broadcast_key(&block)) {
            debug!(height = block.height, peer = %peer, "Dropping duplicate block broadcast");
            return;
        }

        debug!(height = block.height, peer = %peer, "Received new block broadcast");
        let message = AccountingMessage::NewBlockBroadcast(NewBlockBroadcast {
            block: block.clone(),
        });
        if let Err(err) = self.transport.broadcast(message, Some(&peer)).await {
            warn!(height = block.height, %err, "Failed to relay block broadcast");
        }

        self.notify(LiteNodeNotification::NewBlockReceived(block));
    }

    fn on_connected(&mut self, peer: NodeAddress) {
        self.record(|metrics| {
            metrics.inc_peer_connection("connected");
            metrics.set_peers(self.transport.connected_peers().len() as i64);
        });
        if self.retries_exhausted && self.transport.is_seed_node(&peer) {
            info!(peer = %peer, "Seed node connected, restarting block requests");
            self.restart_with_fresh_seeds();
        }
    }

    fn on_disconnected(&mut self, peer: NodeAddress, reason: CloseReason) {
        self.record(|metrics| {
            metrics.inc_peer_connection("disconnected");
            metrics.set_peers(self.transport.connected_peers().len() as i64);
        });
        let interrupted = self.close_handlers_for(&peer);

        if reason == CloseReason::Banned || self.transport.is_banned(&peer) {
            self.seeds.remove(&peer);
        }

        for start_height in interrupted {
            debug!(peer = %peer, start_height, "Re-requesting blocks after disconnect");
            self.request_blocks(start_height);
        }
    }

    fn schedule_retry(&mut self) {
        if self.retry_timer.is_some() {
            debug!("Retry already scheduled");
            return;
        }

        if self.retry_attempts >= self.config.max_retry_attempts {
            if !self.retries_exhausted {
                warn!(attempts = self.retry_attempts, "No seed node available");
                self.retries_exhausted = true;
                self.notify(LiteNodeNotification::NoSeedNodeAvailable);
            }
            return;
        }

        self.retry_attempts += 1;
        let generation = self.next_id();
        let delay = self.config.retry_delay;
        let internal_tx = self.internal_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal_tx.send(InternalEvent::RetryTimerFired { generation });
        });
        self.retry_timer = Some((generation, task));
    }

    fn on_retry_timer(&mut self, generation: u64) {
        if !matches!(self.retry_timer, Some((current, _)) if current == generation) {
            return;
        }
        self.retry_timer = None;
        debug!(attempt = self.retry_attempts, "Retrying block request");
        self.restart();
    }

    fn stop_retry_timer(&mut self) {
        if let Some((_, task)) = self.retry_timer.take() {
            task.abort();
        }
    }

    fn schedule_cleanup(&self, key: RequestKey, id: u64) {
        let delay = self.config.cleanup_delay;
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal_tx.send(InternalEvent::CleanupTimerFired { key, id });
        });
    }

    fn on_cleanup_timer(&mut self, key: RequestKey, id: u64) {
        if !self.requests.get(&key).is_some_and(|handle| handle.id() == id) {
            return;
        }
        warn!(
            peer = %key.0,
            start_height = key.1,
            "Request did not complete in time, terminating it"
        );
        if let Some(handle) = self.requests.remove(&key) {
            handle.stop();
        }
        self.update_in_flight_metric();
    }

    /// Stop the handlers for `peer`. Returns the start heights they served.
    fn close_handlers_for(&mut self, peer: &NodeAddress) -> Vec<Height> {
        let keys = self
            .requests
            .keys()
            .filter(|(address, _)| address == peer)
            .cloned()
            .collect::<Vec<_>>();

        let mut start_heights = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(handle) = self.requests.remove(&key) {
                handle.stop();
                start_heights.push(key.1);
            }
        }
        self.update_in_flight_metric();
        start_heights
    }

    fn close_all_handlers(&mut self) {
        for (_, handle) in self.requests.drain() {
            handle.stop();
        }
        self.update_in_flight_metric();
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn update_in_flight_metric(&self) {
        self.record(|metrics| metrics.set_requests_in_flight(self.requests.len() as i64));
    }

    fn notify(&self, notification: LiteNodeNotification) {
        if self.notifications.send(notification).is_err() {
            debug!("Lite node notification receiver dropped");
        }
    }

    fn record(&self, f: impl FnOnce(&Metrics)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

impl<T: P2pTransport> ChainSyncNode for LiteNodeSync<T> {
    fn lifecycle(&self) -> &NodeLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut NodeLifecycle {
        &mut self.lifecycle
    }
}

/// Broadcast dedup key over the block hash and its tx ids.
pub fn broadcast_key(block: &RawBlock) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(block.hash.as_bytes());
    for tx_id in block.tx_ids() {
        hasher.update(tx_id.as_bytes());
    }
    hasher.finalize().into()
}
