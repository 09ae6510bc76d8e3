use std::fmt::{self, Display};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::req_resp::AccountingMessage;

/// Address of a peer on the overlay network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Why a connection to a peer was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Either side shut the connection down normally.
    Shutdown,
    Timeout,
    /// The peer was banned by the peer manager.
    Banned,
    Fault(String),
}

/// Connection lifecycle and inbound traffic, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The overlay finished bootstrapping.
    Ready,
    Connected(NodeAddress),
    Disconnected {
        peer: NodeAddress,
        reason: CloseReason,
    },
    AllConnectionsLost,
    NewConnectionAfterAllLost,
    AwakeFromStandby,
    Message {
        peer: NodeAddress,
        message: AccountingMessage,
    },
}

impl Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEvent::Ready => write!(f, "Ready"),
            NetworkEvent::Connected(peer) => write!(f, "Connected({peer})"),
            NetworkEvent::Disconnected { peer, reason } => {
                write!(f, "Disconnected({peer}, {reason:?})")
            }
            NetworkEvent::AllConnectionsLost => write!(f, "AllConnectionsLost"),
            NetworkEvent::NewConnectionAfterAllLost => write!(f, "NewConnectionAfterAllLost"),
            NetworkEvent::AwakeFromStandby => write!(f, "AwakeFromStandby"),
            NetworkEvent::Message { peer, message } => write!(f, "Message({peer}, {message})"),
        }
    }
}

/// Outbound side of the overlay network and its peer classification.
#[async_trait]
pub trait P2pTransport: Send + Sync + 'static {
    async fn send(&self, peer: &NodeAddress, message: AccountingMessage) -> Result<()>;

    /// Send to every connected peer except `exclude`.
    async fn broadcast(
        &self,
        message: AccountingMessage,
        exclude: Option<&NodeAddress>,
    ) -> Result<()>;

    fn connected_peers(&self) -> Vec<NodeAddress>;

    fn is_seed_node(&self, peer: &NodeAddress) -> bool;

    fn is_self(&self, peer: &NodeAddress) -> bool;

    fn is_banned(&self, peer: &NodeAddress) -> bool;
}

#[async_trait]
pub trait EventSource<T>: Send {
    async fn recv(&mut self) -> Option<T>;
}

#[async_trait]
impl<T: Send + 'static> EventSource<T> for mpsc::UnboundedReceiver<T> {
    async fn recv(&mut self) -> Option<T> {
        mpsc::UnboundedReceiver::recv(self).await
    }
}
