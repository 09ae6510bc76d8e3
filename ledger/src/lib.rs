pub mod balance;
pub mod error;
pub mod recovery;
pub mod store;

pub use balance::{
    BalanceModel, Month, ReceivedBtcEntry, LEGACY_BURNING_MAN_BTC_FEES_NAME,
    LEGACY_BURNING_MAN_DPT_NAME,
};
pub use error::LedgerError;
pub use recovery::{PurgeRecentBlocks, ReorgRecovery};
pub use store::{AppendOutcome, InMemoryLedger, Ledger};
