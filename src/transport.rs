/// In-process overlay connecting the nodes of one process.
///
/// Each node joins the hub with its address and receives `NetworkEvent`s on
/// its own channel. Messages cross the hub in their wire encoding.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use networking::req_resp::{AccountingCodec, AccountingMessage};
use networking::types::{CloseReason, NetworkEvent, NodeAddress, P2pTransport};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LoopbackHub {
    nodes: Mutex<BTreeMap<NodeAddress, mpsc::UnboundedSender<NetworkEvent>>>,
    banned: Mutex<HashSet<NodeAddress>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the hub. The node gets a `Connected` event per node already
    /// present, then `Ready`.
    pub fn join(&self, address: &NodeAddress) -> mpsc::UnboundedReceiver<NetworkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut nodes = self.nodes.lock();

        for (peer, events) in nodes.iter() {
            let _ = events.send(NetworkEvent::Connected(address.clone()));
            let _ = tx.send(NetworkEvent::Connected(peer.clone()));
        }
        let _ = tx.send(NetworkEvent::Ready);

        nodes.insert(address.clone(), tx);
        info!(address = %address, nodes = nodes.len(), "Node joined loopback hub");
        rx
    }

    pub fn leave(&self, address: &NodeAddress, reason: CloseReason) {
        let mut nodes = self.nodes.lock();
        if nodes.remove(address).is_none() {
            return;
        }
        for events in nodes.values() {
            let _ = events.send(NetworkEvent::Disconnected {
                peer: address.clone(),
                reason: reason.clone(),
            });
        }
        info!(address = %address, ?reason, "Node left loopback hub");
    }

    pub fn ban(&self, address: &NodeAddress) {
        self.banned.lock().insert(address.clone());
        self.leave(address, CloseReason::Banned);
    }

    fn deliver(&self, from: &NodeAddress, to: &NodeAddress, message: &AccountingMessage) -> Result<()> {
        let message = AccountingCodec::decode_message(&AccountingCodec::encode(message)?)?;
        let nodes = self.nodes.lock();
        let events = nodes
            .get(to)
            .ok_or_else(|| anyhow!("peer {to} is not connected"))?;
        events
            .send(NetworkEvent::Message {
                peer: from.clone(),
                message,
            })
            .map_err(|_| anyhow!("peer {to} stopped"))
    }

    fn peers_of(&self, address: &NodeAddress) -> Vec<NodeAddress> {
        self.nodes
            .lock()
            .keys()
            .filter(|peer| *peer != address)
            .cloned()
            .collect()
    }
}

/// One node's view of a `LoopbackHub`.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    address: NodeAddress,
    seed_nodes: Vec<NodeAddress>,
    hub: Arc<LoopbackHub>,
}

impl LoopbackTransport {
    pub fn new(address: NodeAddress, seed_nodes: Vec<NodeAddress>, hub: Arc<LoopbackHub>) -> Self {
        Self {
            address,
            seed_nodes,
            hub,
        }
    }
}

#[async_trait]
impl P2pTransport for LoopbackTransport {
    async fn send(&self, peer: &NodeAddress, message: AccountingMessage) -> Result<()> {
        debug!(from = %self.address, to = %peer, %message, "Sending message");
        self.hub.deliver(&self.address, peer, &message)
    }

    async fn broadcast(
        &self,
        message: AccountingMessage,
        exclude: Option<&NodeAddress>,
    ) -> Result<()> {
        let peers = self
            .hub
            .peers_of(&self.address)
            .into_iter()
            .filter(|peer| Some(peer) != exclude)
            .collect::<Vec<_>>();
        debug!(from = %self.address, num_peers = peers.len(), %message, "Broadcasting message");

        for peer in peers {
            self.hub.deliver(&self.address, &peer, &message)?;
        }
        Ok(())
    }

    fn connected_peers(&self) -> Vec<NodeAddress> {
        self.hub.peers_of(&self.address)
    }

    fn is_seed_node(&self, peer: &NodeAddress) -> bool {
        self.seed_nodes.contains(peer)
    }

    fn is_self(&self, peer: &NodeAddress) -> bool {
        *peer == self.address
    }

    fn is_banned(&self, peer: &NodeAddress) -> bool {
        self.hub.banned.lock().contains(peer)
    }
}
