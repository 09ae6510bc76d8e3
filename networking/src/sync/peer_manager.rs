use std::collections::HashSet;

use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::types::{NodeAddress, P2pTransport};

/// Picks the seed node to request blocks from.
///
/// A connected seed node is preferred. Otherwise a random address is taken
/// from the configured seed nodes that have not been tried yet in this
/// session. Addresses taken from the pool are consumed until `reset`.
#[derive(Debug, Clone, Default)]
pub struct SeedNodeSelector {
    seed_nodes: Vec<NodeAddress>,
    pool: Vec<NodeAddress>,
    tried: HashSet<NodeAddress>,
}

impl SeedNodeSelector {
    pub fn new(seed_nodes: Vec<NodeAddress>) -> Self {
        Self {
            pool: seed_nodes.clone(),
            seed_nodes,
            tried: HashSet::new(),
        }
    }

    pub fn select<T: P2pTransport + ?Sized>(&mut self, transport: &T) -> Option<NodeAddress> {
        if let Some(peer) = self.connected_seed_node(transport) {
            debug!(peer = %peer, "Selected connected seed node");
            return Some(peer);
        }

        self.pool.retain(|address| {
            !transport.is_self(address)
                && !transport.is_banned(address)
                && !self.tried.contains(address)
        });
        self.pool.shuffle(&mut rand::thread_rng());

        let peer = self.pool.pop()?;
        self.tried.insert(peer.clone());
        debug!(peer = %peer, remaining = self.pool.len(), "Selected seed node from pool");
        Some(peer)
    }

    fn connected_seed_node<T: P2pTransport + ?Sized>(&self, transport: &T) -> Option<NodeAddress> {
        let mut candidates = transport
            .connected_peers()
            .into_iter()
            .filter(|peer| {
                transport.is_seed_node(peer)
                    && !transport.is_self(peer)
                    && !transport.is_banned(peer)
                    && !self.tried.contains(peer)
            })
            .collect::<Vec<_>>();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Exclude a peer that failed to answer for the rest of the session.
    pub fn mark_failed(&mut self, peer: &NodeAddress) {
        self.tried.insert(peer.clone());
        self.pool.retain(|address| address != peer);
    }

    /// Drop a banned peer for good, surviving `reset`.
    pub fn remove(&mut self, peer: &NodeAddress) {
        if self.seed_nodes.contains(peer) {
            info!(peer = %peer, "Removing banned seed node");
        }
        self.seed_nodes.retain(|address| address != peer);
        self.pool.retain(|address| address != peer);
    }

    pub fn reset(&mut self) {
        self.pool = self.seed_nodes.clone();
        self.tried.clear();
    }

    pub fn seed_nodes(&self) -> &[NodeAddress] {
        &self.seed_nodes
    }

    pub fn remaining(&self) -> usize {
        self.pool.len()
    }
}
