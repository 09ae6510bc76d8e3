use containers::{Height, TruncatedHash};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(
        "block {height} does not connect: previous hash {previous_hash} != tip hash {tip_hash}"
    )]
    HashNotConnecting {
        height: Height,
        previous_hash: TruncatedHash,
        tip_hash: TruncatedHash,
    },

    #[error("block height {height} does not follow ledger height {last_height}")]
    HeightNotConnecting { height: Height, last_height: Height },
}
