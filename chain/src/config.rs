use containers::Height;
use serde::{Deserialize, Serialize};

/// First block that can contain a payment to a receiver address on mainnet.
pub const EARLIEST_BLOCK_HEIGHT_MAINNET: Height = 656_035;
pub const EARLIEST_BLOCK_HEIGHT_REGTEST: Height = 111;

/// Number of ledger blocks dropped when a reorg is detected.
pub const REORG_PURGE_DEPTH: usize = 10;

/// Most raw blocks a full node returns for one `GetBlocksRequest`.
pub const MAX_BLOCKS_PER_RESPONSE: usize = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn earliest_block_height(&self) -> Height {
        match self {
            Network::Regtest => EARLIEST_BLOCK_HEIGHT_REGTEST,
            Network::Mainnet | Network::Testnet => EARLIEST_BLOCK_HEIGHT_MAINNET,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    pub network: Network,
    pub earliest_block_height: Height,
    pub reorg_purge_depth: usize,
}

impl ChainConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            earliest_block_height: network.earliest_block_height(),
            reorg_purge_depth: REORG_PURGE_DEPTH,
        }
    }

    /// Ledger tip height before any block is stored.
    pub fn empty_ledger_height(&self) -> Height {
        self.earliest_block_height.saturating_sub(1)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::for_network(Network::default())
    }
}

pub const MAINNET_CONFIG: ChainConfig = ChainConfig {
    network: Network::Mainnet,
    earliest_block_height: EARLIEST_BLOCK_HEIGHT_MAINNET,
    reorg_purge_depth: REORG_PURGE_DEPTH,
};
