use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chain::{ChainConfig, Network};
use containers::{BlockHash, Height, RawBlock, ReceiverRegistry, TruncatedHash, TxId};
use ledger::InMemoryLedger;
use parking_lot::Mutex;

use crate::req_resp::{AccountingMessage, GetBlocksRequest};
use crate::sync::{SourceError, TrustedSource};
use crate::types::{NodeAddress, P2pTransport};

mod lite_node_tests;

pub const SEED_A: &str = "seed-a.onion:8000";
pub const SEED_B: &str = "seed-b.onion:8000";

pub fn regtest() -> ChainConfig {
    ChainConfig::for_network(Network::Regtest)
}

/// Hash whose last four bytes encode fork and height.
pub fn block_hash(height: Height, fork: u8) -> BlockHash {
    let tag = (u32::from(fork) << 24) | height;
    let mut bytes = [0u8; 32];
    bytes[28..].copy_from_slice(&tag.to_be_bytes());
    BlockHash(bytes)
}

pub fn truncated_hash(height: Height, fork: u8) -> TruncatedHash {
    block_hash(height, fork).truncated()
}

pub fn raw_block(height: Height, fork: u8) -> RawBlock {
    raw_block_with_parent(height, fork, fork)
}

pub fn raw_block_with_parent(height: Height, fork: u8, parent_fork: u8) -> RawBlock {
    RawBlock {
        height,
        hash: block_hash(height, fork),
        previous_block_hash: block_hash(height - 1, parent_fork),
        time: 1_690_000_000 + u64::from(height) * 600,
        txs: vec![],
    }
}

pub fn raw_chain(from: Height, to: Height, fork: u8) -> Vec<RawBlock> {
    (from..=to).map(|height| raw_block(height, fork)).collect()
}

pub fn empty_ledger() -> Arc<Mutex<InMemoryLedger>> {
    Arc::new(Mutex::new(InMemoryLedger::new(
        &regtest(),
        ReceiverRegistry::default(),
        TxId::default(),
    )))
}

pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<(NodeAddress, AccountingMessage)>>,
    pub broadcasts: Mutex<Vec<(AccountingMessage, Option<NodeAddress>)>>,
    pub connected: Mutex<Vec<NodeAddress>>,
    pub seed_nodes: Vec<NodeAddress>,
    pub self_address: Option<NodeAddress>,
    pub banned: Mutex<HashSet<NodeAddress>>,
    pub failing: Mutex<HashSet<NodeAddress>>,
    pub hang_sends: AtomicBool,
}

impl MockTransport {
    pub fn with_seeds(seeds: &[&str]) -> Self {
        Self {
            seed_nodes: seeds.iter().map(|seed| NodeAddress::from(*seed)).collect(),
            ..Self::default()
        }
    }

    pub fn connect(&self, peer: &str) {
        self.connected.lock().push(NodeAddress::from(peer));
    }

    pub fn block_requests(&self) -> Vec<(NodeAddress, GetBlocksRequest)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(peer, message)| match message {
                AccountingMessage::GetBlocksRequest(request) => Some((peer.clone(), *request)),
                _ => None,
            })
            .collect()
    }

    pub fn last_block_request(&self) -> Option<(NodeAddress, GetBlocksRequest)> {
        self.block_requests().pop()
    }
}

#[async_trait]
impl P2pTransport for MockTransport {
    async fn send(&self, peer: &NodeAddress, message: AccountingMessage) -> Result<()> {
        if self.hang_sends.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.failing.lock().contains(peer) {
            return Err(anyhow!("connection to {peer} refused"));
        }
        self.sent.lock().push((peer.clone(), message));
        Ok(())
    }

    async fn broadcast(
        &self,
        message: AccountingMessage,
        exclude: Option<&NodeAddress>,
    ) -> Result<()> {
        self.broadcasts.lock().push((message, exclude.cloned()));
        Ok(())
    }

    fn connected_peers(&self) -> Vec<NodeAddress> {
        self.connected.lock().clone()
    }

    fn is_seed_node(&self, peer: &NodeAddress) -> bool {
        self.seed_nodes.contains(peer)
    }

    fn is_self(&self, peer: &NodeAddress) -> bool {
        self.self_address.as_ref() == Some(peer)
    }

    fn is_banned(&self, peer: &NodeAddress) -> bool {
        self.banned.lock().contains(peer)
    }
}

/// Scripted trusted source.
#[derive(Default)]
pub struct MockSource {
    pub chain: Mutex<BTreeMap<Height, RawBlock>>,
    /// Successive head heights; the last one sticks.
    pub heads: Mutex<VecDeque<Height>>,
    /// Blocks returned instead of the chain block, once each.
    pub overrides: Mutex<HashMap<Height, VecDeque<RawBlock>>>,
    pub requested: Mutex<Vec<Height>>,
    pub unreachable: AtomicBool,
}

impl MockSource {
    pub fn with_chain(blocks: Vec<RawBlock>) -> Self {
        let source = Self::default();
        source.extend(blocks);
        source
    }

    pub fn extend(&self, blocks: Vec<RawBlock>) {
        let mut chain = self.chain.lock();
        for block in blocks {
            chain.insert(block.height, block);
        }
        let head = chain.keys().next_back().copied().unwrap_or(110);
        drop(chain);
        self.set_heads(&[head]);
    }

    pub fn set_heads(&self, heads: &[Height]) {
        *self.heads.lock() = heads.iter().copied().collect();
    }

    pub fn override_once(&self, height: Height, block: RawBlock) {
        self.overrides
            .lock()
            .entry(height)
            .or_default()
            .push_back(block);
    }

    pub fn times_requested(&self, height: Height) -> usize {
        self.requested.lock().iter().filter(|h| **h == height).count()
    }
}

#[async_trait]
impl TrustedSource for MockSource {
    async fn head_height(&self) -> Result<Height, SourceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SourceError::Unreachable("connection refused".into()));
        }
        let mut heads = self.heads.lock();
        let head = if heads.len() > 1 {
            heads.pop_front()
        } else {
            heads.front().copied()
        };
        Ok(head.unwrap_or(110))
    }

    async fn raw_block(&self, height: Height) -> Result<RawBlock, SourceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SourceError::Unreachable("connection refused".into()));
        }
        self.requested.lock().push(height);
        if let Some(block) = self
            .overrides
            .lock()
            .get_mut(&height)
            .and_then(VecDeque::pop_front)
        {
            return Ok(block);
        }
        self.chain
            .lock()
            .get(&height)
            .cloned()
            .ok_or_else(|| SourceError::Rpc(format!("unknown block height {height}")))
    }
}

pub fn drain<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}
