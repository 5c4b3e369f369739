//! Write and read facade over commit/reveal publishing and scanning.

use std::fmt;

use bitcoin::{
    ScriptBuf, Txid,
    key::XOnlyPublicKey,
    secp256k1::{Secp256k1, VerifyOnly},
};
use btcda_envelope_fmt::{Extraction, build_leaf_script, check_blob_size};
use btcda_taproot::{KeypairSigner, Signer, derive_address};
use tracing::*;

use crate::{
    commit::publish_commit,
    config::{RelayerConfig, RelayerParams},
    errors::{Missing, RelayerError, RelayerResult},
    node::NodeClient,
    reveal::{publish_reveal, resolve_commit_input},
    rpc::BitcoindRpcClient,
    scanner::BlockScanner,
    store::{CommitStore, FileCommitStore, MemoryCommitStore},
    types::{CommitRecord, ExtractedRecord, WriteReceipt},
};

/// Publishes blobs through commit/reveal pairs and reads them back.
///
/// Reads take `&self`. Writes take `&mut self`, so one relayer instance never
/// runs two writes against the same wallet and key at once.
pub struct Relayer<N, S, C> {
    node: N,
    signer: S,
    store: C,
    params: RelayerParams,
    secp: Secp256k1<VerifyOnly>,
}

impl<N, S, C> fmt::Debug for Relayer<N, S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relayer")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Relayer<BitcoindRpcClient, KeypairSigner, Box<dyn CommitStore>> {
    /// Builds a relayer talking to bitcoind, with the store the config asks
    /// for.
    pub fn from_config(config: &RelayerConfig) -> RelayerResult<Self> {
        let params = config.params()?;
        let signer = config.signer()?;
        let node = BitcoindRpcClient::new(config.rpc()?)?;

        let store: Box<dyn CommitStore> = match &config.commit_store_dir {
            Some(dir) => Box::new(FileCommitStore::open(dir)?),
            None => Box::new(MemoryCommitStore::new()),
        };

        Self::new(node, signer, store, params)
    }
}

impl<N: NodeClient, S: Signer, C: CommitStore> Relayer<N, S, C> {
    /// Creates a relayer, checking that the reveal output is spendable.
    pub fn new(node: N, signer: S, store: C, params: RelayerParams) -> RelayerResult<Self> {
        params.reveal_value()?;
        Ok(Self {
            node,
            signer,
            store,
            params,
            secp: Secp256k1::verification_only(),
        })
    }

    /// Validated parameters.
    pub fn params(&self) -> &RelayerParams {
        &self.params
    }

    /// Node client.
    pub fn node(&self) -> &N {
        &self.node
    }

    /// Commit record store.
    pub fn store(&self) -> &C {
        &self.store
    }

    /// Key guarding every leaf this relayer writes.
    pub fn reveal_pubkey(&self) -> XOnlyPublicKey {
        self.signer.x_only_public_key()
    }

    /// Internal key commit outputs are tweaked from.
    pub fn internal_key(&self) -> XOnlyPublicKey {
        self.params
            .internal_key
            .unwrap_or_else(|| self.reveal_pubkey())
    }

    /// Script reveal outputs pay to.
    pub fn reveal_destination(&self) -> ScriptBuf {
        match &self.params.reveal_destination {
            Some(script) => script.clone(),
            None => ScriptBuf::new_p2tr(&self.secp, self.reveal_pubkey(), None),
        }
    }

    fn scanner(&self) -> BlockScanner<&N> {
        BlockScanner::new(&self.node, self.params.tag)
    }

    /// Publishes `blob`: funds a commit address, then reveals it.
    ///
    /// The commit record is persisted between the two steps, updated with the
    /// output index once it is located, and removed once the reveal is
    /// accepted. If the reveal fails, the record stays in the store for
    /// [`Self::resume_pending`].
    pub fn write(&mut self, blob: &[u8]) -> RelayerResult<WriteReceipt> {
        let _span = debug_span!("write", len = blob.len()).entered();

        check_blob_size(blob)?;
        let payload = self.params.tag.tag_blob(blob);
        let reveal_pubkey = self.reveal_pubkey();
        let leaf_script = build_leaf_script(&payload, &reveal_pubkey)?;
        let derived = derive_address(
            &self.secp,
            leaf_script,
            self.internal_key(),
            self.params.network,
        )?;
        debug!(address = %derived.address(), "derived commit address");

        let record = publish_commit(
            &self.node,
            &derived,
            payload,
            reveal_pubkey,
            self.params.commit_amount,
        )?;
        self.store.put(&record)?;

        let commit_txid = record.commit_txid;
        let reveal_txid = self.reveal(record)?;
        self.forget(&commit_txid);

        Ok(WriteReceipt {
            commit_txid,
            reveal_txid,
        })
    }

    /// Locates the commit output, records its index and reveals it.
    fn reveal(&mut self, mut record: CommitRecord) -> RelayerResult<Txid> {
        let input = resolve_commit_input(&self.node, &self.secp, &record, self.params.network)?;
        if record.vout != Some(input.vout()) {
            record.vout = Some(input.vout());
            self.store.put(&record)?;
        }

        publish_reveal(
            &self.node,
            &self.signer,
            &self.secp,
            &record,
            &input,
            self.reveal_destination(),
            self.params.reveal_fee,
        )
    }

    /// Drops the record of a revealed commit. The reveal is already out, so a
    /// failure here is only logged; a leftover record resolves to the same
    /// reveal txid on the next [`Self::resume_pending`].
    fn forget(&mut self, commit_txid: &Txid) {
        if let Err(err) = self.store.remove(commit_txid) {
            warn!(%commit_txid, %err, "could not remove revealed commit record");
        }
    }

    /// Reveals every commit left in the store by an interrupted write.
    ///
    /// Records that still fail stay in the store and are logged; the
    /// returned receipts cover only the reveals that went through. A reveal
    /// the node already has counts as gone through.
    pub fn resume_pending(&mut self) -> RelayerResult<Vec<WriteReceipt>> {
        let pending = self.store.pending()?;
        if !pending.is_empty() {
            info!(count = pending.len(), "resuming pending commits");
        }

        let mut receipts = Vec::with_capacity(pending.len());
        for record in pending {
            let commit_txid = record.commit_txid;
            match self.reveal(record) {
                Ok(reveal_txid) => {
                    self.forget(&commit_txid);
                    receipts.push(WriteReceipt {
                        commit_txid,
                        reveal_txid,
                    });
                }
                Err(e) => {
                    warn!(%commit_txid, err = %e, "pending commit still cannot be revealed");
                }
            }
        }
        Ok(receipts)
    }

    /// Extracts the blob carried by a reveal transaction.
    pub fn read_transaction(&self, txid: &Txid) -> RelayerResult<Extraction> {
        self.scanner().scan_transaction(txid)
    }

    /// Every blob in the main-chain block at `height`.
    pub fn read_height(&self, height: u64) -> RelayerResult<Vec<ExtractedRecord>> {
        self.scanner().scan_block(height)
    }

    /// Height of the block confirming `txid`.
    pub fn check(&self, txid: &Txid) -> RelayerResult<u64> {
        let hash = self
            .node
            .get_transaction_block_hash(txid)
            .map_err(|e| RelayerError::from_lookup(e, Missing::Transaction(*txid)))?
            .ok_or(RelayerError::Unconfirmed(*txid))?;
        Ok(self.node.get_block_height(&hash)?)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, Network, hashes::Hash, secp256k1::SecretKey};
    use btcda_envelope_fmt::{EnvelopeBuildError, MAX_BLOB_SIZE, ROLLKIT_TAG};

    use std::io;

    use super::*;
    use crate::{
        config::ConfigError,
        node::NodeError,
        store::StoreError,
        test_utils::{DecoyPlacement, MemNode},
    };

    /// Store whose records can be written but never removed.
    #[derive(Debug, Default)]
    struct StickyStore(MemoryCommitStore);

    impl CommitStore for StickyStore {
        fn put(&mut self, record: &CommitRecord) -> Result<(), StoreError> {
            self.0.put(record)
        }

        fn remove(&mut self, _txid: &Txid) -> Result<(), StoreError> {
            Err(io::Error::other("read-only store").into())
        }

        fn pending(&self) -> Result<Vec<CommitRecord>, StoreError> {
            self.0.pending()
        }
    }

    type TestRelayer = Relayer<MemNode, KeypairSigner, MemoryCommitStore>;

    fn signer() -> KeypairSigner {
        KeypairSigner::new(SecretKey::from_slice(&[0x42; 32]).unwrap())
    }

    fn relayer_with(node: MemNode) -> TestRelayer {
        Relayer::new(
            node,
            signer(),
            MemoryCommitStore::new(),
            RelayerParams::new(Network::Regtest),
        )
        .unwrap()
    }

    fn relayer() -> TestRelayer {
        relayer_with(MemNode::new())
    }

    #[test]
    fn test_write_then_read() {
        let mut relayer = relayer();
        let blob = b"rollkit-btc: gm";

        let receipt = relayer.write(blob).unwrap();
        assert_ne!(receipt.commit_txid, receipt.reveal_txid);
        assert!(relayer.store().pending().unwrap().is_empty());

        assert_eq!(
            relayer.read_transaction(&receipt.reveal_txid).unwrap(),
            Extraction::Matched(blob.to_vec())
        );
        assert_eq!(
            relayer.read_transaction(&receipt.commit_txid).unwrap(),
            Extraction::NotMatched
        );

        assert!(matches!(
            relayer.check(&receipt.reveal_txid),
            Err(RelayerError::Unconfirmed(_))
        ));

        let height = relayer.node().mine();
        assert_eq!(relayer.check(&receipt.reveal_txid).unwrap(), height);

        let records = relayer.read_height(height).unwrap();
        assert_eq!(records, vec![ExtractedRecord {
            txid: receipt.reveal_txid,
            height,
            blob: blob.to_vec(),
        }]);
    }

    #[test]
    fn test_reveal_pays_destination() {
        let mut relayer = relayer();
        let receipt = relayer.write(b"gm").unwrap();

        let reveal = relayer
            .node()
            .get_raw_transaction(&receipt.reveal_txid)
            .unwrap();
        assert_eq!(reveal.input.len(), 1);
        assert_eq!(reveal.input[0].witness.len(), 3);
        assert_eq!(reveal.output.len(), 1);
        assert_eq!(reveal.output[0].value, Amount::from_sat(1_000));
        assert_eq!(reveal.output[0].script_pubkey, relayer.reveal_destination());
        assert!(reveal.output[0].script_pubkey.is_p2tr());
    }

    #[test]
    fn test_block_with_unrelated_txs() {
        let mut relayer = relayer();
        let receipt = relayer.write(b"only me").unwrap();
        for i in 0..9 {
            relayer.node().add_unrelated_tx(i);
        }
        let height = relayer.node().mine();

        let records = relayer.read_height(height).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].txid, receipt.reveal_txid);
        assert_eq!(records[0].blob, b"only me");
    }

    #[test]
    fn test_empty_and_max_blobs() {
        let mut relayer = relayer();

        let empty = relayer.write(b"").unwrap();
        assert_eq!(
            relayer.read_transaction(&empty.reveal_txid).unwrap(),
            Extraction::Matched(Vec::new())
        );

        let big = vec![0xab; MAX_BLOB_SIZE];
        let full = relayer.write(&big).unwrap();
        assert_eq!(
            relayer.read_transaction(&full.reveal_txid).unwrap(),
            Extraction::Matched(big)
        );
    }

    #[test]
    fn test_blob_too_large() {
        let mut relayer = relayer();
        let err = relayer.write(&vec![0; MAX_BLOB_SIZE + 1]).unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Encode(EnvelopeBuildError::BlobTooLarge { .. })
        ));
        assert_eq!(relayer.node().tx_count(), 0);
    }

    #[test]
    fn test_ambiguous_output_uses_first_match() {
        let node = MemNode::new();
        node.set_decoy(Some(DecoyPlacement::AfterPayment));
        let mut relayer = relayer_with(node);

        let receipt = relayer.write(b"twin outputs").unwrap();
        let commit = relayer
            .node()
            .get_raw_transaction(&receipt.commit_txid)
            .unwrap();
        let matches = commit
            .output
            .iter()
            .filter(|o| o.value == relayer.params().commit_amount)
            .count();
        assert_eq!(matches, 2);

        let reveal = relayer
            .node()
            .get_raw_transaction(&receipt.reveal_txid)
            .unwrap();
        assert_eq!(reveal.input[0].previous_output.vout, 0);
    }

    #[test]
    fn test_decoy_first_is_not_found_and_resumable() {
        let node = MemNode::new();
        node.set_decoy(Some(DecoyPlacement::BeforePayment));
        let mut relayer = relayer_with(node);

        let (txid, amount) = match relayer.write(b"shadowed") {
            Err(RelayerError::NotFound(Missing::CommitOutput { txid, amount })) => (txid, amount),
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(amount, relayer.params().commit_amount);

        let pending = relayer.store().pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].commit_txid, txid);
        assert_eq!(pending[0].vout, None);

        // Still shadowed, so the record stays.
        assert!(relayer.resume_pending().unwrap().is_empty());
        assert_eq!(relayer.store().pending().unwrap().len(), 1);
    }

    #[test]
    fn test_resume_after_failed_reveal() {
        let node = MemNode::new();
        node.reject_next_broadcast();
        let mut relayer = relayer_with(node);

        let err = relayer.write(b"second time lucky").unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Broadcast {
                stage: "reveal",
                source: NodeError::Rejected(_),
            }
        ));
        let commit_txid = relayer.store().pending().unwrap()[0].commit_txid;

        let receipts = relayer.resume_pending().unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].commit_txid, commit_txid);
        assert!(relayer.store().pending().unwrap().is_empty());

        assert_eq!(
            relayer
                .read_transaction(&receipts[0].reveal_txid)
                .unwrap()
                .into_blob()
                .unwrap(),
            b"second time lucky"
        );
    }

    #[test]
    fn test_commit_failure_is_broadcast_error() {
        let node = MemNode::new();
        node.set_wallet_balance(Amount::from_sat(10));
        let mut relayer = relayer_with(node);

        let err = relayer.write(b"gm").unwrap_err();
        assert!(matches!(err, RelayerError::Broadcast { stage: "commit", .. }));
        assert!(relayer.store().pending().unwrap().is_empty());
    }

    #[test]
    fn test_custom_internal_key_and_tag() {
        let mut params = RelayerParams::new(Network::Regtest);
        params.internal_key = Some(
            "c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5"
                .parse()
                .unwrap(),
        );
        params.tag = "blob".parse().unwrap();
        let mut relayer =
            Relayer::new(MemNode::new(), signer(), MemoryCommitStore::new(), params).unwrap();

        let receipt = relayer.write(b"gm").unwrap();
        assert_eq!(
            relayer.read_transaction(&receipt.reveal_txid).unwrap(),
            Extraction::Matched(b"gm".to_vec())
        );

        let default_scanner = BlockScanner::new(relayer.node(), ROLLKIT_TAG);
        assert_eq!(
            default_scanner.scan_transaction(&receipt.reveal_txid).unwrap(),
            Extraction::NotMatched
        );
    }

    #[test]
    fn test_read_missing() {
        let relayer = relayer();
        assert!(matches!(
            relayer.read_height(7),
            Err(RelayerError::NotFound(Missing::Block(7)))
        ));

        let txid = Txid::all_zeros();
        assert!(matches!(
            relayer.read_transaction(&txid),
            Err(RelayerError::NotFound(Missing::Transaction(_)))
        ));
        assert!(matches!(
            relayer.check(&txid),
            Err(RelayerError::NotFound(Missing::Transaction(_)))
        ));
    }

    #[test]
    fn test_rejects_bad_fee() {
        let mut params = RelayerParams::new(Network::Regtest);
        params.reveal_fee = params.commit_amount;
        let err = Relayer::new(MemNode::new(), signer(), MemoryCommitStore::new(), params)
            .unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Config(ConfigError::FeeTooHigh { .. })
        ));
    }

    #[test]
    fn test_located_vout_is_recorded() {
        let node = MemNode::new();
        node.set_decoy(Some(DecoyPlacement::AfterPayment));
        node.reject_next_broadcast();
        let mut relayer = relayer_with(node);

        assert!(relayer.write(b"where am i").is_err());
        let mut record = relayer.store().pending().unwrap().remove(0);
        assert_eq!(record.vout, Some(0));

        // A stale index is corrected from the located output before signing.
        record.vout = Some(1);
        relayer.store.put(&record).unwrap();
        relayer.node().reject_next_broadcast();
        assert!(relayer.resume_pending().unwrap().is_empty());
        assert_eq!(relayer.store().pending().unwrap()[0].vout, Some(0));

        let receipts = relayer.resume_pending().unwrap();
        assert_eq!(receipts.len(), 1);
        let reveal = relayer
            .node()
            .get_raw_transaction(&receipts[0].reveal_txid)
            .unwrap();
        assert_eq!(reveal.input[0].previous_output.vout, 0);
        assert!(relayer.store().pending().unwrap().is_empty());
    }

    #[test]
    fn test_store_remove_failure_keeps_receipt() {
        let mut relayer = Relayer::new(
            MemNode::new(),
            signer(),
            StickyStore::default(),
            RelayerParams::new(Network::Regtest),
        )
        .unwrap();

        let receipt = relayer.write(b"sticky").unwrap();
        assert_eq!(relayer.store().pending().unwrap().len(), 1);

        // The leftover record resolves to the reveal already on chain.
        relayer.node().mine();
        let receipts = relayer.resume_pending().unwrap();
        assert_eq!(receipts, vec![receipt]);
        assert_eq!(
            relayer.read_transaction(&receipt.reveal_txid).unwrap(),
            Extraction::Matched(b"sticky".to_vec())
        );
    }
}
