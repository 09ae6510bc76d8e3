use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Utc};
use containers::{AccountingBlock, AccountingTxType, TruncatedHash};

/// Receiver of the DPT payouts before burning men took over.
pub const LEGACY_BURNING_MAN_DPT_NAME: &str = "Legacy Burningman (DPT)";

/// Receiver of the BTC trade fees before burning men took over.
pub const LEGACY_BURNING_MAN_BTC_FEES_NAME: &str = "Legacy Burningman (BTC fees)";

/// Calendar month in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    pub year: i32,
    /// 1 to 12.
    pub month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Month of a timestamp in milliseconds.
    pub fn of_date(date: u64) -> Option<Self> {
        let millis = i64::try_from(date).ok()?;
        let time: DateTime<Utc> = DateTime::from_timestamp_millis(millis)?;
        Some(Self::new(time.year(), time.month()))
    }
}

/// One payment received by a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedBtcEntry {
    /// Last 4 bytes of the paying tx id.
    pub truncated_tx_id: TruncatedHash,
    pub amount: u64,
    /// Block time in milliseconds.
    pub date: u64,
    pub tx_type: AccountingTxType,
}

impl ReceivedBtcEntry {
    pub fn month(&self) -> Option<Month> {
        Month::of_date(self.date)
    }
}

/// Received payments per receiver name.
///
/// Totals and the monthly view only count payments to burning men; the
/// legacy receivers are kept per name but left out of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceModel {
    entries_by_name: BTreeMap<String, Vec<ReceivedBtcEntry>>,
    excluded_names: BTreeSet<String>,
}

impl Default for BalanceModel {
    fn default() -> Self {
        Self {
            entries_by_name: BTreeMap::new(),
            excluded_names: [LEGACY_BURNING_MAN_DPT_NAME, LEGACY_BURNING_MAN_BTC_FEES_NAME]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl BalanceModel {
    pub fn from_blocks<'a>(blocks: impl IntoIterator<Item = &'a AccountingBlock>) -> Self {
        let mut model = Self::default();
        for block in blocks {
            model.add_block(block);
        }
        model
    }

    /// Replace the receiver names left out of the totals.
    pub fn with_excluded_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_block(&mut self, block: &AccountingBlock) {
        for tx in &block.txs {
            for output in &tx.outputs {
                self.entries_by_name
                    .entry(output.name.clone())
                    .or_default()
                    .push(ReceivedBtcEntry {
                        truncated_tx_id: tx.tx_id.truncated(),
                        amount: output.value,
                        date: block.date(),
                        tx_type: tx.tx_type,
                    });
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries_by_name.keys().map(String::as_str)
    }

    pub fn entries(&self, name: &str) -> &[ReceivedBtcEntry] {
        self.entries_by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn total_received(&self, name: &str) -> u64 {
        self.entries(name).iter().map(|entry| entry.amount).sum()
    }

    pub fn total_distributed_btc(&self) -> u64 {
        self.total_where(|_| true)
    }

    pub fn total_distributed_btc_fees(&self) -> u64 {
        self.total_where(|tx_type| tx_type == AccountingTxType::BtcTradeFee)
    }

    pub fn total_distributed_dpt(&self) -> u64 {
        self.total_where(|tx_type| tx_type == AccountingTxType::Dpt)
    }

    /// Payments to burning men received in `month`.
    pub fn distributed_in_month(&self, month: Month) -> Vec<&ReceivedBtcEntry> {
        self.distributed_entries()
            .filter(|entry| entry.month() == Some(month))
            .collect()
    }

    /// Payments to burning men grouped by the month they were received in.
    pub fn distributed_by_month(&self) -> BTreeMap<Month, Vec<&ReceivedBtcEntry>> {
        let mut by_month: BTreeMap<Month, Vec<&ReceivedBtcEntry>> = BTreeMap::new();
        for entry in self.distributed_entries() {
            if let Some(month) = entry.month() {
                by_month.entry(month).or_default().push(entry);
            }
        }
        by_month
    }

    fn distributed_entries(&self) -> impl Iterator<Item = &ReceivedBtcEntry> {
        self.entries_by_name
            .iter()
            .filter(|(name, _)| !self.excluded_names.contains(name.as_str()))
            .flat_map(|(_, entries)| entries)
    }

    fn total_where(&self, filter: impl Fn(AccountingTxType) -> bool) -> u64 {
        self.distributed_entries()
            .filter(|entry| filter(entry.tx_type))
            .map(|entry| entry.amount)
            .sum()
    }
}
