use std::path::Path;

use anyhow::{Context, Result};
use chain::{ChainConfig, Network};
use containers::{Height, ReceiverRegistry, TxId};
use networking::types::NodeAddress;
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_SELF_ADDRESS: &str = "127.0.0.1:9999";

/// Node settings loaded from a YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: Network,

    /// Overrides the earliest block height of `network`.
    #[serde(default)]
    pub earliest_block_height: Option<Height>,

    /// Tx id of the genesis transaction, hex encoded.
    #[serde(default)]
    pub genesis_tx_id: TxId,

    /// Receiver address to receiver name.
    #[serde(default)]
    pub receivers: ReceiverRegistry,

    #[serde(default)]
    pub seed_nodes: Vec<NodeAddress>,

    #[serde(default = "default_self_address")]
    pub self_address: NodeAddress,
}

fn default_self_address() -> NodeAddress {
    NodeAddress::from(DEFAULT_SELF_ADDRESS)
}

impl NodeConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        let config: NodeConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("invalid config file {}", path.display()))?;

        info!(
            network = ?config.network,
            receivers = config.receivers.len(),
            seed_nodes = config.seed_nodes.len(),
            "Node config loaded"
        );
        Ok(config)
    }

    pub fn chain_config(&self) -> ChainConfig {
        let mut chain = ChainConfig::for_network(self.network);
        if let Some(height) = self.earliest_block_height {
            chain.earliest_block_height = height;
        }
        chain
    }
}
