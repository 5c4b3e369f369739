use bitcoin::{sighash::TaprootError, taproot::TaprootBuilderError};
use thiserror::Error;

/// Errors from turning a leaf script into an output key and address.
#[derive(Debug, Error)]
pub enum DeriveError {
    /// The leaf could not be added to the tree.
    #[error("invalid tap leaf: {0}")]
    InvalidLeaf(#[from] TaprootBuilderError),

    /// The tree could not be finalized against the internal key.
    #[error("failed to finalize taproot tree")]
    Finalize,

    /// The finalized tree has no control block for our leaf.
    #[error("no control block for leaf script")]
    MissingControlBlock,
}

/// Errors from producing a tapscript signature.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Key material could not be loaded.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// The signature hash could not be computed for the transaction.
    #[error("sighash: {0}")]
    Sighash(#[from] TaprootError),

    /// A signature was produced but does not verify.
    #[error("signature self-check failed: {0}")]
    SelfCheck(#[from] VerifyError),
}

/// Reasons a script-path spend fails verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// No such input in the transaction.
    #[error("input {0} out of range")]
    MissingInput(usize),

    /// Witness is not `[signature, script, control block]`.
    #[error("expected 3 witness elements, found {0}")]
    WitnessShape(usize),

    /// The spent output is not a P2TR output.
    #[error("spent output is not pay-to-taproot")]
    NotP2tr,

    /// The control block could not be decoded.
    #[error("invalid control block: {0}")]
    InvalidControlBlock(bitcoin::taproot::TaprootError),

    /// The control block does not commit to the revealed script.
    #[error("control block does not commit to script under output key")]
    CommitmentMismatch,

    /// The revealed script does not end with `<32-byte key> OP_CHECKSIG`.
    #[error("script has no trailing x-only key and OP_CHECKSIG")]
    NoCheckSigKey,

    /// The signature element could not be decoded.
    #[error("invalid signature encoding: {0}")]
    SignatureEncoding(bitcoin::taproot::SigFromSliceError),

    /// Signature hash computation failed.
    #[error("sighash: {0}")]
    Sighash(#[from] TaprootError),

    /// The signature does not verify under the script key.
    #[error("signature does not verify")]
    BadSignature,
}
