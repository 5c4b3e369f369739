use bitcoin::{Amount, ScriptBuf, Txid, key::XOnlyPublicKey};
use btcda_envelope_fmt::{EnvelopeBuildError, build_leaf_script};
use serde::{Deserialize, Serialize};

/// Everything needed to reveal a funded commit output.
///
/// Persisted before the reveal is attempted so an interrupted write can be
/// finished later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit transaction id.
    pub commit_txid: Txid,

    /// Index of the funded output, once it has been located.
    pub vout: Option<u32>,

    /// Exact amount paid to the commit address.
    pub amount_sat: u64,

    /// Tagged payload committed in the leaf script.
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,

    /// Key in the leaf's `<key> OP_CHECKSIG`.
    pub reveal_pubkey: XOnlyPublicKey,

    /// Untweaked internal key of the commit output.
    pub internal_key: XOnlyPublicKey,
}

impl CommitRecord {
    /// Commit amount.
    pub fn amount(&self) -> Amount {
        Amount::from_sat(self.amount_sat)
    }

    /// Rebuilds the leaf script this commit pays to.
    pub fn leaf_script(&self) -> Result<ScriptBuf, EnvelopeBuildError> {
        build_leaf_script(&self.payload, &self.reveal_pubkey)
    }
}

/// A blob found on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRecord {
    /// Reveal transaction carrying the blob.
    pub txid: Txid,

    /// Height of the block it was found in.
    pub height: u64,

    /// The blob, tag stripped.
    pub blob: Vec<u8>,
}

/// Transaction ids produced by a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Transaction funding the commit address.
    pub commit_txid: Txid,

    /// Transaction revealing the blob; pass it to reads.
    pub reveal_txid: Txid,
}

mod hex_bytes {
    use bitcoin::hex::{DisplayHex, FromHex};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&bytes.to_lower_hex_string())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        Vec::<u8>::from_hex(&s).map_err(de::Error::custom)
    }
}
