//! Block classification for the accounting ledger.
//!
//! Decides from raw transaction data alone (no UTXO index) whether a
//! transaction pays the known receivers, and whether it is a delayed payout
//! transaction (DPT) or a BTC trade fee transaction.
//!
//! The DPT rules are exact: a 2-of-2 multisig spend with a timelocked input and
//! only receiver outputs. The trade fee rules are a heuristic on the first
//! output and accept a controlled false-positive rate. The constants below
//! decide what ends up in the ledger; changing them changes every node's
//! ledger, so they must stay as they are.

mod dpt;

use containers::{
    AccountingBlock, AccountingTx, AccountingTxOutput, AccountingTxType, RawBlock, RawTx,
    RawTxOutput, ReceiverRegistry, ScriptType, TxId,
};
use tracing::{trace, warn};

pub use dpt::{is_dpt_witness, REDEEM_SCRIPT_HEX_LEN};

/// Sequence number a DPT input uses to enable its lock time.
pub const DPT_INPUT_SEQUENCE: u32 = containers::block::NO_SEQUENCE - 1;

/// Upper bound for any DPT output. Real payouts are capped at 4 BTC.
pub const MAX_DPT_OUTPUT_VALUE: u64 = 600_000_000;

/// Exclusive lower bound for a trade fee output.
pub const MIN_TRADE_FEE_VALUE: u64 = 2_500;

/// Exclusive upper bound for a trade fee output.
pub const MAX_TRADE_FEE_VALUE: u64 = 10_000_000;

pub const MIN_TRADE_FEE_TX_OUTPUTS: usize = 2;
pub const MAX_TRADE_FEE_TX_OUTPUTS: usize = 3;

/// Classify every transaction of `block` and build the ledger entry.
///
/// Pure: the same inputs always give the same block, and nothing outside the
/// return value is touched (apart from logging).
pub fn classify(
    block: &RawBlock,
    receivers: &ReceiverRegistry,
    genesis_tx_id: &TxId,
) -> AccountingBlock {
    let txs = block
        .txs
        .iter()
        .filter(|tx| tx.id != *genesis_tx_id)
        .filter(|tx| receivers.contains_opt(first_output_address(tx)))
        .filter_map(|tx| classify_tx(tx, receivers))
        .collect::<Vec<_>>();

    if !txs.is_empty() {
        trace!(height = block.height, num_txs = txs.len(), "Classified accounting txs");
    }

    AccountingBlock {
        height: block.height,
        time_in_sec: u32::try_from(block.time).unwrap_or(u32::MAX),
        truncated_hash: block.hash.truncated(),
        truncated_previous_block_hash: block.previous_block_hash.truncated(),
        txs,
    }
}

/// Classify a single transaction that already passed the receiver filter.
pub fn classify_tx(tx: &RawTx, receivers: &ReceiverRegistry) -> Option<AccountingTx> {
    if is_dpt(tx, receivers) {
        let outputs = tx
            .outputs
            .iter()
            .map(|output| to_accounting_output(output, receivers))
            .collect::<Option<Vec<_>>>()?;
        return Some(AccountingTx {
            tx_type: AccountingTxType::Dpt,
            tx_id: tx.id,
            outputs,
        });
    }

    if is_trade_fee_tx(tx) {
        let output = to_accounting_output(tx.first_output()?, receivers)?;
        return Some(AccountingTx {
            tx_type: AccountingTxType::BtcTradeFee,
            tx_id: tx.id,
            outputs: vec![output],
        });
    }

    None
}

/// Exact DPT check. Every rule must hold.
pub fn is_dpt(tx: &RawTx, receivers: &ReceiverRegistry) -> bool {
    let [input] = tx.inputs.as_slice() else {
        return false;
    };

    input.sequence == DPT_INPUT_SEQUENCE
        && tx.has_block_height_lock_time()
        && tx
            .outputs
            .iter()
            .all(|output| receivers.contains_opt(output.address.as_deref()))
        && is_dpt_witness(&input.witness)
        && all_outputs_have_expected_script_type(tx)
        && tx
            .outputs
            .iter()
            .all(|output| output.value <= MAX_DPT_OUTPUT_VALUE)
}

/// Heuristic trade fee check on the first output.
pub fn is_trade_fee_tx(tx: &RawTx) -> bool {
    let num_outputs = tx.outputs.len();
    if !(MIN_TRADE_FEE_TX_OUTPUTS..=MAX_TRADE_FEE_TX_OUTPUTS).contains(&num_outputs) {
        return false;
    }

    tx.first_output().is_some_and(|output| {
        output.value > MIN_TRADE_FEE_VALUE
            && output.value < MAX_TRADE_FEE_VALUE
            && is_expected_script_type(output.script_type)
    })
}

/// Script types a receiver address can be paid with.
pub fn is_expected_script_type(script_type: ScriptType) -> bool {
    matches!(
        script_type,
        ScriptType::PubKeyHash | ScriptType::ScriptHash | ScriptType::WitnessV0KeyHash
    )
}

fn all_outputs_have_expected_script_type(tx: &RawTx) -> bool {
    let mut all_expected = true;
    for (index, output) in tx.outputs.iter().enumerate() {
        if !is_expected_script_type(output.script_type) {
            warn!(
                tx_id = %tx.id,
                index,
                script_type = ?output.script_type,
                "Unexpected script type at receiver output"
            );
            all_expected = false;
        }
    }
    all_expected
}

fn first_output_address(tx: &RawTx) -> Option<&str> {
    tx.first_output().and_then(|output| output.address.as_deref())
}

fn to_accounting_output(
    output: &RawTxOutput,
    receivers: &ReceiverRegistry,
) -> Option<AccountingTxOutput> {
    let name = receivers.name_of(output.address.as_deref()?)?;
    Some(AccountingTxOutput {
        value: output.value,
        name: name.to_owned(),
    })
}
