pub mod accounting;
pub mod block;
pub mod receivers;
pub mod serde_helpers;
pub mod types;

pub use accounting::{AccountingBlock, AccountingTx, AccountingTxOutput, AccountingTxType};
pub use block::{RawBlock, RawTx, RawTxInput, RawTxOutput, ScriptType};
pub use receivers::ReceiverRegistry;
pub use types::{BlockHash, Height, TruncatedHash, TxId};
