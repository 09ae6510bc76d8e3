use tracing::info;

/// Lifecycle flags shared by both sync strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeLifecycle {
    pub p2p_network_ready: bool,
    pub initial_block_requests_complete: bool,
}

impl NodeLifecycle {
    /// Appended blocks are only published once the overlay is up and the
    /// node has caught up with its source.
    pub fn can_publish(&self) -> bool {
        self.p2p_network_ready && self.initial_block_requests_complete
    }
}

/// Common surface of the full-node and lite-node sync strategies.
pub trait ChainSyncNode {
    fn lifecycle(&self) -> &NodeLifecycle;

    fn lifecycle_mut(&mut self) -> &mut NodeLifecycle;

    fn on_p2p_network_ready(&mut self) {
        if !self.lifecycle().p2p_network_ready {
            info!("P2P network ready");
        }
        self.lifecycle_mut().p2p_network_ready = true;
    }

    fn on_initial_block_requests_complete(&mut self) {
        if !self.lifecycle().initial_block_requests_complete {
            info!("Initial block requests complete");
        }
        self.lifecycle_mut().initial_block_requests_complete = true;
    }

    fn can_publish(&self) -> bool {
        self.lifecycle().can_publish()
    }
}
