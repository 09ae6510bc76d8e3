use serde::{Deserialize, Serialize};

use crate::{BlockHash, Height, TxId};

/// Sequence number meaning "final, no relative lock".
pub const NO_SEQUENCE: u32 = 0xFFFF_FFFF;

/// Lock times below this value are block heights, above it unix timestamps.
pub const LOCK_TIME_THRESHOLD: u32 = 500_000_000;

/// Output script classification as reported by the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    #[serde(rename = "pubkey")]
    PubKey,
    #[serde(rename = "pubkeyhash")]
    PubKeyHash,
    #[serde(rename = "scripthash")]
    ScriptHash,
    #[serde(rename = "multisig")]
    Multisig,
    #[serde(rename = "nulldata")]
    NullData,
    #[serde(rename = "witness_v0_keyhash")]
    WitnessV0KeyHash,
    #[serde(rename = "witness_v0_scripthash")]
    WitnessV0ScriptHash,
    #[serde(rename = "witness_v1_taproot")]
    WitnessV1Taproot,
    #[serde(rename = "nonstandard")]
    NonStandard,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTxInput {
    #[serde(with = "crate::serde_helpers::hex_bytes_list", default)]
    pub witness: Vec<Vec<u8>>,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTxOutput {
    /// Value in satoshi.
    pub value: u64,
    /// Decoded address, if the script has one.
    #[serde(default)]
    pub address: Option<String>,
    pub script_type: ScriptType,
    #[serde(with = "crate::serde_helpers::hex_bytes_opt", default)]
    pub op_return_data: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTx {
    pub id: TxId,
    #[serde(default)]
    pub lock_time: u32,
    pub inputs: Vec<RawTxInput>,
    pub outputs: Vec<RawTxOutput>,
}

impl RawTx {
    /// True if the lock time is set and interpreted as a block height.
    pub fn has_block_height_lock_time(&self) -> bool {
        self.lock_time > 0 && self.lock_time < LOCK_TIME_THRESHOLD
    }

    pub fn first_output(&self) -> Option<&RawTxOutput> {
        self.outputs.first()
    }
}

/// A block as delivered by the trusted source or a peer. Immutable once
/// received; consumed by classification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub height: Height,
    pub hash: BlockHash,
    pub previous_block_hash: BlockHash,
    /// Block time in seconds since epoch.
    pub time: u64,
    pub txs: Vec<RawTx>,
}

impl RawBlock {
    pub fn tx_ids(&self) -> impl Iterator<Item = &TxId> {
        self.txs.iter().map(|tx| &tx.id)
    }
}
