//! Publishes opaque blobs to Bitcoin through Taproot commit/reveal pairs and
//! reads them back.
//!
//! A write tags the blob, wraps it in a leaf script, pays a fixed amount to
//! the resulting P2TR address ([`commit`]) and then spends that output through
//! the leaf ([`reveal`]), which puts the script and with it the blob into the
//! reveal's witness. Reads scan witnesses for the envelope ([`scanner`]).
//!
//! [`Relayer`] ties the steps together over a [`NodeClient`], a
//! [`Signer`](btcda_taproot::Signer) and a [`CommitStore`]. [`BitcoinDa`]
//! exposes it as a rollup DA layer.

pub mod commit;
pub mod config;
pub mod da;
/// Error types for relayer operations.
pub mod errors;
pub mod node;
pub mod relayer;
pub mod reveal;
pub mod rpc;
pub mod scanner;
pub mod store;
mod types;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigError, RelayerConfig, RelayerParams};
pub use da::BitcoinDa;
pub use errors::{Missing, RelayerError, RelayerResult};
pub use node::{NodeClient, NodeError, NodeResult};
pub use relayer::Relayer;
pub use rpc::BitcoindRpcClient;
pub use scanner::BlockScanner;
pub use store::{CommitStore, FileCommitStore, MemoryCommitStore, StoreError};
pub use types::{CommitRecord, ExtractedRecord, WriteReceipt};
