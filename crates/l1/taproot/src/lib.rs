//! Taproot plumbing for commit/reveal publishing.
//!
//! Turns a leaf script into an address to fund ([`derive_address`]), and
//! signs and checks the script-path spend that reveals it ([`Signer`],
//! [`verify_script_spend`]). Tagged hashes, key tweaks and bech32m all come
//! from the `bitcoin` crate; nothing here reimplements them.

pub mod address;
/// Error types for derivation, signing and verification.
pub mod errors;
pub mod signer;
pub mod verify;

pub use address::{DerivedAddress, derive_address};
pub use errors::{DeriveError, SigningError, VerifyError};
pub use signer::{KeypairSigner, Signer, sign_and_verify, tapscript_sighash};
pub use verify::{verify_script_spend, verify_script_spend_with};
