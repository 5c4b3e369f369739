//! Block and transaction scanning for blobs.

use bitcoin::{Block, Script, Transaction, Txid};
use btcda_envelope_fmt::{Extraction, ProtocolTag, extract_blob};
use tracing::*;

use crate::{
    errors::{Missing, RelayerError, RelayerResult},
    node::NodeClient,
    types::ExtractedRecord,
};

/// Extracts a blob from the first input of `tx`.
///
/// A reveal carries its leaf script as the second witness element. Any other
/// transaction, including coinbases, is [`Extraction::NotMatched`].
pub fn scan_tx(tx: &Transaction, tag: &ProtocolTag) -> Extraction {
    let Some(input) = tx.input.first() else {
        return Extraction::NotMatched;
    };
    if input.witness.len() <= 1 {
        return Extraction::NotMatched;
    }
    match input.witness.nth(1) {
        Some(script) => extract_blob(Script::from_bytes(script), tag),
        None => Extraction::NotMatched,
    }
}

/// Every blob in `block`, in transaction order.
pub fn extract_block(block: &Block, height: u64, tag: &ProtocolTag) -> Vec<ExtractedRecord> {
    block
        .txdata
        .iter()
        .filter_map(|tx| {
            scan_tx(tx, tag).into_blob().map(|blob| ExtractedRecord {
                txid: tx.compute_txid(),
                height,
                blob,
            })
        })
        .collect()
}

/// Reads blobs back through a node.
#[derive(Debug, Clone)]
pub struct BlockScanner<N> {
    node: N,
    tag: ProtocolTag,
}

impl<N: NodeClient> BlockScanner<N> {
    /// Creates a scanner matching `tag`.
    pub fn new(node: N, tag: ProtocolTag) -> Self {
        Self { node, tag }
    }

    /// Tag blobs must carry.
    pub fn tag(&self) -> &ProtocolTag {
        &self.tag
    }

    /// Node used for lookups.
    pub fn node(&self) -> &N {
        &self.node
    }

    /// Every blob in the main-chain block at `height`.
    pub fn scan_block(&self, height: u64) -> RelayerResult<Vec<ExtractedRecord>> {
        let _span = debug_span!("scan_block", height).entered();

        let hash = self
            .node
            .get_block_hash(height)
            .map_err(|e| RelayerError::from_lookup(e, Missing::Block(height)))?;
        let block = self
            .node
            .get_block(&hash)
            .map_err(|e| RelayerError::from_lookup(e, Missing::Block(height)))?;

        let records = extract_block(&block, height, &self.tag);
        debug!(%hash, txs = block.txdata.len(), found = records.len(), "scanned block");
        Ok(records)
    }

    /// Extracts the blob from one transaction, confirmed or not.
    pub fn scan_transaction(&self, txid: &Txid) -> RelayerResult<Extraction> {
        let tx = self
            .node
            .get_raw_transaction(txid)
            .map_err(|e| RelayerError::from_lookup(e, Missing::Transaction(*txid)))?;
        Ok(scan_tx(&tx, &self.tag))
    }
}
