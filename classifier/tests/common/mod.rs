//! Builders for raw blocks and transactions used by the classifier tests.
#![allow(dead_code)]

use containers::{
    BlockHash, RawBlock, RawTx, RawTxInput, RawTxOutput, ReceiverRegistry, ScriptType, TxId,
};

pub const ALICE_ADDRESS: &str = "bc1qalice";
pub const BOB_ADDRESS: &str = "3BobScriptHash";
pub const STRANGER_ADDRESS: &str = "bc1qstranger";

pub fn receivers() -> ReceiverRegistry {
    [
        (ALICE_ADDRESS.to_owned(), "alice".to_owned()),
        (BOB_ADDRESS.to_owned(), "bob".to_owned()),
    ]
    .into_iter()
    .collect()
}

pub fn tx_id(byte: u8) -> TxId {
    TxId([byte; 32])
}

pub fn genesis_tx_id() -> TxId {
    tx_id(0xee)
}

pub fn output(value: u64, address: &str, script_type: ScriptType) -> RawTxOutput {
    RawTxOutput {
        value,
        address: Some(address.to_owned()),
        script_type,
        op_return_data: None,
    }
}

pub fn redeem_script() -> Vec<u8> {
    let mut script = vec![0x52, 0x21];
    script.extend_from_slice(&[0x02; 33]);
    script.push(0x21);
    script.extend_from_slice(&[0x03; 33]);
    script.extend_from_slice(&[0x52, 0xae]);
    script
}

pub fn dpt_witness() -> Vec<Vec<u8>> {
    vec![vec![], vec![0x30; 71], vec![0x30; 72], redeem_script()]
}

/// A delayed payout transaction paying both receivers.
pub fn dpt_tx() -> RawTx {
    RawTx {
        id: tx_id(0x0d),
        lock_time: 800_100,
        inputs: vec![RawTxInput {
            witness: dpt_witness(),
            sequence: 0xFFFF_FFFE,
        }],
        outputs: vec![
            output(150_000_000, ALICE_ADDRESS, ScriptType::WitnessV0KeyHash),
            output(50_000_000, BOB_ADDRESS, ScriptType::ScriptHash),
        ],
    }
}

/// A trade fee transaction: fee to a receiver, then change.
pub fn trade_fee_tx(value: u64) -> RawTx {
    RawTx {
        id: tx_id(0x0f),
        lock_time: 0,
        inputs: vec![RawTxInput {
            witness: vec![vec![0x30; 71], vec![0x02; 33]],
            sequence: 0xFFFF_FFFF,
        }],
        outputs: vec![
            output(value, ALICE_ADDRESS, ScriptType::WitnessV0KeyHash),
            output(1_234_567, STRANGER_ADDRESS, ScriptType::WitnessV0KeyHash),
        ],
    }
}

pub fn block(height: u32, txs: Vec<RawTx>) -> RawBlock {
    let mut hash = [0u8; 32];
    hash[28..].copy_from_slice(&height.to_be_bytes());
    let mut previous = [0u8; 32];
    previous[28..].copy_from_slice(&(height - 1).to_be_bytes());

    RawBlock {
        height,
        hash: BlockHash(hash),
        previous_block_hash: BlockHash(previous),
        time: 1_690_000_000,
        txs,
    }
}
