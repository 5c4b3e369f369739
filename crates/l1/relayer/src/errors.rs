use bitcoin::{Amount, Txid};
use btcda_envelope_fmt::EnvelopeBuildError;
use btcda_taproot::{DeriveError, SigningError};
use thiserror::Error;

use crate::{config::ConfigError, node::NodeError, store::StoreError};

/// Things a read or reveal can fail to find.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Missing {
    /// Unknown transaction id.
    #[error("transaction {0}")]
    Transaction(Txid),

    /// No main-chain block at this height.
    #[error("block at height {0}")]
    Block(u64),

    /// The commit transaction has no usable output of the commit amount.
    #[error("output of {amount} in commit {txid}")]
    CommitOutput {
        /// Commit transaction id.
        txid: Txid,
        /// Amount that was searched for.
        amount: Amount,
    },

    /// The transaction exists but carries no blob.
    #[error("blob in transaction {0}")]
    Blob(Txid),
}

/// Errors for relayer operations.
///
/// Every variant aborts the current write or read; nothing is retried
/// internally.
#[derive(Debug, Error)]
pub enum RelayerError {
    /// The blob could not be encoded into a leaf script.
    #[error("encode: {0}")]
    Encode(#[from] EnvelopeBuildError),

    /// The commit address could not be derived.
    #[error("derive address: {0}")]
    Derive(#[from] DeriveError),

    /// A transaction, block or output does not exist.
    #[error("{0} not found")]
    NotFound(Missing),

    /// The transaction is known but not in a block yet.
    #[error("transaction {0} is not confirmed")]
    Unconfirmed(Txid),

    /// The reveal could not be signed.
    #[error("signing: {0}")]
    Signing(#[from] SigningError),

    /// The node refused to fund the commit or accept the reveal.
    #[error("broadcast {stage}: {source}")]
    Broadcast {
        /// Which transaction was being published.
        stage: &'static str,
        /// Node error.
        #[source]
        source: NodeError,
    },

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Node failure outside of broadcasting.
    #[error("node: {0}")]
    Node(#[from] NodeError),

    /// Commit records could not be persisted or loaded.
    #[error("commit store: {0}")]
    Store(#[from] StoreError),
}

impl RelayerError {
    /// Maps a node error to [`RelayerError::NotFound`] when the node reported
    /// a missing object, keeping other failures as node errors.
    pub(crate) fn from_lookup(err: NodeError, missing: Missing) -> Self {
        match err {
            NodeError::NotFound(_) => Self::NotFound(missing),
            other => Self::Node(other),
        }
    }
}

/// Wrapper result type.
pub type RelayerResult<T> = Result<T, RelayerError>;
