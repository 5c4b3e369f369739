//! Tapscript leaf format for blobs published through commit/reveal.
//!
//! A blob is prefixed with a 4-byte [`ProtocolTag`], split into pushes of at
//! most 520 bytes and wrapped in a never-executed branch, followed by the key
//! that actually guards the spend:
//!
//! ```text
//! OP_FALSE OP_IF <chunk_1> ... <chunk_n> OP_ENDIF <reveal_key> OP_CHECKSIG
//! ```
//!
//! Readers run [`extract_blob`] on the second witness element of a reveal
//! input. Anything that is not exactly this shape, or does not carry the
//! expected tag, comes back as [`Extraction::NotMatched`].
//!
//! # Examples
//!
//! ```
//! use std::str::FromStr;
//!
//! use bitcoin::key::XOnlyPublicKey;
//! use btcda_envelope_fmt::{Extraction, ROLLKIT_TAG, build_tagged_leaf_script, extract_blob};
//!
//! let key = XOnlyPublicKey::from_str(
//!     "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
//! )
//! .unwrap();
//! let script = build_tagged_leaf_script(&ROLLKIT_TAG, b"gm", &key).unwrap();
//! assert_eq!(extract_blob(&script, &ROLLKIT_TAG), Extraction::Matched(b"gm".to_vec()));
//! ```

/// Leaf script builder.
pub mod builder;

/// Error types for envelope operations.
pub mod errors;

/// Template matching extractor.
pub mod parser;

#[cfg(feature = "serde")]
mod serde;

// Dev-deps only exercised by the serde tests.
#[cfg(all(test, not(feature = "serde")))]
use bincode as _;
#[cfg(all(test, not(feature = "serde")))]
use serde_json as _;
mod tag;

pub use builder::{
    MAX_BLOB_SIZE, MAX_PAYLOAD_PUSHES, build_leaf_script, build_tagged_leaf_script,
    check_blob_size,
};
pub use errors::EnvelopeBuildError;
pub use parser::{Extraction, LeafEnvelope, extract_blob, parse_leaf_script};
pub use tag::{InvalidProtocolTag, ProtocolTag, ROLLKIT_TAG, TAG_LEN};
