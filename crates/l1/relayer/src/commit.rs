//! Commit transaction publishing.

use bitcoin::{Amount, key::XOnlyPublicKey};
use btcda_taproot::DerivedAddress;
use tracing::*;

use crate::{
    errors::{RelayerError, RelayerResult},
    node::NodeClient,
    types::CommitRecord,
};

/// Funds `derived`'s address with exactly `amount` from the node wallet.
///
/// Coin selection, change and fees are the wallet's business. The returned
/// record has no output index yet; the reveal locates it.
pub fn publish_commit<N: NodeClient + ?Sized>(
    node: &N,
    derived: &DerivedAddress,
    payload: Vec<u8>,
    reveal_pubkey: XOnlyPublicKey,
    amount: Amount,
) -> RelayerResult<CommitRecord> {
    let commit_txid = node
        .send_to_address(derived.address(), amount)
        .map_err(|source| RelayerError::Broadcast {
            stage: "commit",
            source,
        })?;

    info!(%commit_txid, address = %derived.address(), %amount, "published commit");

    Ok(CommitRecord {
        commit_txid,
        vout: None,
        amount_sat: amount.to_sat(),
        payload,
        reveal_pubkey,
        internal_key: derived.internal_key(),
    })
}
