//! Verification of script-path spends of the form `[sig, script, control block]`.

use bitcoin::{
    Script, Transaction, TxOut,
    hashes::Hash,
    key::XOnlyPublicKey,
    opcodes::all::OP_CHECKSIG,
    script::Instruction,
    secp256k1::{Message, Secp256k1, Verification},
    taproot::{self, ControlBlock, TapLeafHash},
};

use crate::{errors::VerifyError, signer::tapscript_sighash};

/// Verifies a script-path spend with a fresh verification context.
pub fn verify_script_spend(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
) -> Result<(), VerifyError> {
    verify_script_spend_with(
        &Secp256k1::verification_only(),
        tx,
        input_index,
        prevouts,
    )
}

/// Verifies that input `input_index` of `tx` spends its P2TR prevout through
/// the revealed leaf.
///
/// Checks the control block commitment against the output key, then the
/// Schnorr signature against the key in the leaf's trailing
/// `<key> OP_CHECKSIG`. The leaf body is not executed.
pub fn verify_script_spend_with<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
) -> Result<(), VerifyError> {
    let input = tx
        .input
        .get(input_index)
        .ok_or(VerifyError::MissingInput(input_index))?;
    let prevout = prevouts
        .get(input_index)
        .ok_or(VerifyError::MissingInput(input_index))?;

    let witness = &input.witness;
    let (Some(sig_bytes), Some(script_bytes), Some(cb_bytes), 3) =
        (witness.nth(0), witness.nth(1), witness.nth(2), witness.len())
    else {
        return Err(VerifyError::WitnessShape(witness.len()));
    };

    let output_key = p2tr_output_key(&prevout.script_pubkey).ok_or(VerifyError::NotP2tr)?;

    let script = Script::from_bytes(script_bytes);
    let control_block = ControlBlock::decode(cb_bytes).map_err(VerifyError::InvalidControlBlock)?;
    if !control_block.verify_taproot_commitment(secp, output_key, script) {
        return Err(VerifyError::CommitmentMismatch);
    }

    let key = checksig_key(script).ok_or(VerifyError::NoCheckSigKey)?;
    let signature =
        taproot::Signature::from_slice(sig_bytes).map_err(VerifyError::SignatureEncoding)?;

    let leaf_hash = TapLeafHash::from_script(script, control_block.leaf_version);
    let sighash = tapscript_sighash(tx, input_index, prevouts, leaf_hash, signature.sighash_type)?;
    let msg = Message::from_digest(sighash.to_byte_array());

    secp.verify_schnorr(&signature.signature, &msg, &key)
        .map_err(|_| VerifyError::BadSignature)
}

/// Extracts the x-only key from an `OP_1 <32 bytes>` script.
fn p2tr_output_key(script_pubkey: &Script) -> Option<XOnlyPublicKey> {
    if !script_pubkey.is_p2tr() {
        return None;
    }
    XOnlyPublicKey::from_slice(&script_pubkey.as_bytes()[2..34]).ok()
}

/// Returns the key of a script ending in `<32-byte key> OP_CHECKSIG`.
fn checksig_key(script: &Script) -> Option<XOnlyPublicKey> {
    let instrs = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    match instrs.as_slice() {
        [.., Instruction::PushBytes(key), Instruction::Op(OP_CHECKSIG)] => {
            XOnlyPublicKey::from_slice(key.as_bytes()).ok()
        }
        _ => None,
    }
}
