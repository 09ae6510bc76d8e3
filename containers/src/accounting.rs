use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Height, TruncatedHash, TxId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountingTxType {
    /// Delayed payout transaction: 2-of-2 multisig spend with a timelocked input.
    #[serde(rename = "DPT")]
    Dpt,
    #[serde(rename = "BTC_TRADE_FEE")]
    BtcTradeFee,
}

impl AccountingTxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountingTxType::Dpt => "DPT",
            AccountingTxType::BtcTradeFee => "BTC_TRADE_FEE",
        }
    }
}

impl fmt::Display for AccountingTxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingTxOutput {
    /// Amount in satoshi.
    pub value: u64,
    /// Receiver name resolved from the output address.
    pub name: String,
}

/// A fee payment to one or more receivers. Produced only by classification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingTx {
    pub tx_type: AccountingTxType,
    pub tx_id: TxId,
    pub outputs: Vec<AccountingTxOutput>,
}

impl AccountingTx {
    pub fn total_value(&self) -> u64 {
        self.outputs.iter().map(|output| output.value).sum()
    }
}

/// Ledger entry derived from one raw block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingBlock {
    pub height: Height,
    pub time_in_sec: u32,
    pub truncated_hash: TruncatedHash,
    pub truncated_previous_block_hash: TruncatedHash,
    pub txs: Vec<AccountingTx>,
}

impl AccountingBlock {
    /// Block time in milliseconds.
    pub fn date(&self) -> u64 {
        u64::from(self.time_in_sec) * 1000
    }

    /// Whether this block can be appended directly after `previous`.
    pub fn connects_to(&self, previous: &AccountingBlock) -> bool {
        self.height_connects_to(previous) && self.hash_connects_to(previous)
    }

    pub fn height_connects_to(&self, previous: &AccountingBlock) -> bool {
        previous.height.checked_add(1) == Some(self.height)
    }

    pub fn hash_connects_to(&self, previous: &AccountingBlock) -> bool {
        self.truncated_previous_block_hash == previous.truncated_hash
    }
}
