// Witness layout of a DPT input spending the 2-of-2 deposit output:
// [empty, sig_a, sig_b, redeem_script]

/// Hex length of `OP_2 <33 byte key> <33 byte key> OP_2 OP_CHECKMULTISIG`.
pub const REDEEM_SCRIPT_HEX_LEN: usize = 142;

const MIN_SIGNATURE_HEX_LEN: usize = 140;
const MAX_SIGNATURE_HEX_LEN: usize = 146;

const WITNESS_STACK_LEN: usize = 4;

/// `OP_2 PUSH33`
const REDEEM_SCRIPT_PREFIX: &str = "5221";
/// `PUSH33` between the two keys.
const REDEEM_SCRIPT_SEPARATOR: &str = "21";
/// `OP_2 OP_CHECKMULTISIG`
const REDEEM_SCRIPT_SUFFIX: &str = "52ae";

const FIRST_KEY_END: usize = 4 + 66;
const SECOND_KEY_END: usize = FIRST_KEY_END + 2 + 66;

/// Check the witness stack of a DPT input byte-exactly.
pub fn is_dpt_witness(witness: &[Vec<u8>]) -> bool {
    let [empty, sig_a, sig_b, redeem_script] = witness else {
        return false;
    };
    debug_assert_eq!(witness.len(), WITNESS_STACK_LEN);

    empty.is_empty()
        && is_signature(sig_a)
        && is_signature(sig_b)
        && is_multisig_redeem_script(&hex::encode(redeem_script))
}

fn is_signature(item: &[u8]) -> bool {
    (MIN_SIGNATURE_HEX_LEN..=MAX_SIGNATURE_HEX_LEN).contains(&(item.len() * 2))
}

fn is_multisig_redeem_script(script_hex: &str) -> bool {
    script_hex.len() == REDEEM_SCRIPT_HEX_LEN
        && script_hex.starts_with(REDEEM_SCRIPT_PREFIX)
        && &script_hex[FIRST_KEY_END..FIRST_KEY_END + 2] == REDEEM_SCRIPT_SEPARATOR
        && script_hex[SECOND_KEY_END..].starts_with(REDEEM_SCRIPT_SUFFIX)
}
