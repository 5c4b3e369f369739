//! Rollup data-availability adapter.
//!
//! Blob ids are reveal txids.

use std::fmt;

use bitcoin::Txid;
use btcda_envelope_fmt::{MAX_BLOB_SIZE, check_blob_size};
use btcda_taproot::Signer;
use tracing::*;

use crate::{
    errors::{Missing, RelayerError, RelayerResult},
    node::NodeClient,
    relayer::Relayer,
    store::CommitStore,
};

/// DA interface backed by a [`Relayer`].
pub struct BitcoinDa<N, S, C> {
    relayer: Relayer<N, S, C>,
}

impl<N, S, C> fmt::Debug for BitcoinDa<N, S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcoinDa")
            .field("relayer", &self.relayer)
            .finish()
    }
}

impl<N: NodeClient, S: Signer, C: CommitStore> BitcoinDa<N, S, C> {
    /// Wraps a relayer.
    pub fn new(relayer: Relayer<N, S, C>) -> Self {
        Self { relayer }
    }

    /// Underlying relayer.
    pub fn relayer(&self) -> &Relayer<N, S, C> {
        &self.relayer
    }

    /// Unwraps the relayer.
    pub fn into_inner(self) -> Relayer<N, S, C> {
        self.relayer
    }

    /// Largest blob [`Self::submit`] accepts.
    pub fn max_blob_size(&self) -> usize {
        MAX_BLOB_SIZE
    }

    /// Writes each blob in order and returns their ids.
    ///
    /// Sizes are checked up front so an oversized blob does not leave the
    /// earlier ones published. A failure part way through returns the error;
    /// blobs already written stay on chain.
    pub fn submit(&mut self, blobs: &[Vec<u8>]) -> RelayerResult<Vec<Txid>> {
        for blob in blobs {
            check_blob_size(blob)?;
        }

        let mut ids = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let receipt = self.relayer.write(blob)?;
            ids.push(receipt.reveal_txid);
        }
        debug!(count = ids.len(), "submitted blobs");
        Ok(ids)
    }

    /// Fetches the blob behind each id.
    pub fn get(&self, ids: &[Txid]) -> RelayerResult<Vec<Vec<u8>>> {
        ids.iter()
            .map(|id| {
                self.relayer
                    .read_transaction(id)?
                    .into_blob()
                    .ok_or(RelayerError::NotFound(Missing::Blob(*id)))
            })
            .collect()
    }

    /// Ids of every blob in the block at `height`.
    pub fn get_ids(&self, height: u64) -> RelayerResult<Vec<Txid>> {
        Ok(self
            .relayer
            .read_height(height)?
            .into_iter()
            .map(|r| r.txid)
            .collect())
    }
}
