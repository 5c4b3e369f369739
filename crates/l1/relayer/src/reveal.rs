//! Reveal transaction construction and publishing.

use bitcoin::{
    Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
    absolute::LockTime,
    secp256k1::{Secp256k1, Verification},
    transaction::Version,
};
use btcda_taproot::{DerivedAddress, Signer, SigningError, derive_address, sign_and_verify};
use tracing::*;

use crate::{
    config::ConfigError,
    errors::{Missing, RelayerError, RelayerResult},
    node::{NodeClient, NodeError},
    types::CommitRecord,
};

/// Output of a commit transaction picked for spending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedOutput {
    /// Index of the first output with the commit amount.
    pub vout: u32,

    /// How many outputs had the commit amount.
    pub matches: usize,
}

impl LocatedOutput {
    /// Whether more than one output had the commit amount.
    pub fn is_ambiguous(&self) -> bool {
        self.matches > 1
    }
}

/// Finds the first output of `tx` worth exactly `amount`.
///
/// The wallet decides output order, so the value is the only thing we can
/// match on before checking the script.
pub fn locate_commit_output(tx: &Transaction, amount: Amount) -> Option<LocatedOutput> {
    let mut hits = tx
        .output
        .iter()
        .enumerate()
        .filter(|(_, out)| out.value == amount)
        .map(|(i, _)| i);

    let first = hits.next()?;
    Some(LocatedOutput {
        vout: first as u32,
        matches: 1 + hits.count(),
    })
}

/// Unsigned reveal spending `commit` into a single output.
pub fn build_reveal_tx(commit: OutPoint, value: Amount, destination: ScriptBuf) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: commit,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value,
            script_pubkey: destination,
        }],
    }
}

/// A commit output checked against the record that funded it, ready to be
/// spent.
#[derive(Debug, Clone)]
pub struct CommitInput {
    outpoint: OutPoint,
    prevout: TxOut,
    derived: DerivedAddress,
}

impl CommitInput {
    /// Output being spent.
    pub fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    /// Index of the output in the commit transaction.
    pub fn vout(&self) -> u32 {
        self.outpoint.vout
    }

    /// The output itself.
    pub fn prevout(&self) -> &TxOut {
        &self.prevout
    }
}

/// Finds and checks the output `record` funded.
///
/// The leaf and address are rebuilt from the record, so a record reloaded
/// from storage resolves the same way as one fresh from
/// [`publish_commit`](crate::commit::publish_commit). The output is located by
/// value even if the record already carries an index; a disagreement is
/// logged and the located index wins.
pub fn resolve_commit_input<N, C>(
    node: &N,
    secp: &Secp256k1<C>,
    record: &CommitRecord,
    network: Network,
) -> RelayerResult<CommitInput>
where
    N: NodeClient + ?Sized,
    C: Verification,
{
    let commit_txid = record.commit_txid;
    let amount = record.amount();
    let missing_output = || {
        RelayerError::NotFound(Missing::CommitOutput {
            txid: commit_txid,
            amount,
        })
    };

    let commit_tx = node
        .get_raw_transaction(&commit_txid)
        .map_err(|e| RelayerError::from_lookup(e, Missing::Transaction(commit_txid)))?;

    let located = locate_commit_output(&commit_tx, amount).ok_or_else(missing_output)?;
    if located.is_ambiguous() {
        warn!(%commit_txid, matches = located.matches, vout = located.vout, "several commit outputs share the commit amount, using the first");
    }
    if record.vout.is_some_and(|v| v != located.vout) {
        warn!(%commit_txid, recorded = ?record.vout, located = located.vout, "commit output moved");
    }

    let leaf_script = record.leaf_script()?;
    let derived = derive_address(secp, leaf_script, record.internal_key, network)?;

    let prevout = commit_tx.output[located.vout as usize].clone();
    if prevout.script_pubkey != derived.script_pubkey() {
        warn!(%commit_txid, vout = located.vout, "output with commit amount does not pay the commit address");
        return Err(missing_output());
    }

    Ok(CommitInput {
        outpoint: OutPoint::new(commit_txid, located.vout),
        prevout,
        derived,
    })
}

/// Spends `input` through its leaf, paying `amount - fee` to `destination`,
/// and broadcasts the reveal.
///
/// The reveal txid does not cover the witness, so it only depends on the
/// commit outpoint, the value and the destination. If the node rejects the
/// broadcast but already knows that txid, an earlier attempt went through and
/// its txid is returned.
pub fn publish_reveal<N, S, C>(
    node: &N,
    signer: &S,
    secp: &Secp256k1<C>,
    record: &CommitRecord,
    input: &CommitInput,
    destination: ScriptBuf,
    fee: Amount,
) -> RelayerResult<Txid>
where
    N: NodeClient + ?Sized,
    S: Signer + ?Sized,
    C: Verification,
{
    let commit_txid = record.commit_txid;
    let amount = record.amount();

    if signer.x_only_public_key() != record.reveal_pubkey {
        return Err(SigningError::InvalidKey(format!(
            "signer key {} does not guard leaf key {}",
            signer.x_only_public_key(),
            record.reveal_pubkey
        ))
        .into());
    }

    let value = amount
        .checked_sub(fee)
        .filter(|v| *v > Amount::ZERO)
        .ok_or(ConfigError::FeeTooHigh { fee, amount })?;

    let mut reveal_tx = build_reveal_tx(input.outpoint, value, destination);
    sign_and_verify(
        signer,
        secp,
        &mut reveal_tx,
        0,
        std::slice::from_ref(&input.prevout),
        input.derived.leaf_script(),
        input.derived.control_block(),
    )?;

    let reveal_txid = match node.send_raw_transaction(&reveal_tx) {
        Ok(txid) => txid,
        Err(NodeError::Rejected(reason)) => {
            let txid = reveal_tx.compute_txid();
            if node.get_raw_transaction(&txid).is_err() {
                return Err(RelayerError::Broadcast {
                    stage: "reveal",
                    source: NodeError::Rejected(reason),
                });
            }
            info!(%commit_txid, reveal_txid = %txid, %reason, "reveal was already published");
            txid
        }
        Err(source) => {
            return Err(RelayerError::Broadcast {
                stage: "reveal",
                source,
            });
        }
    };

    info!(%commit_txid, %reveal_txid, vout = input.vout(), %value, "published reveal");
    Ok(reveal_txid)
}
