//! Node client seam.

use std::sync::Arc;

use bitcoin::{Address, Amount, Block, BlockHash, Transaction, Txid};
use thiserror::Error;

/// Errors reported by a node client.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The requested transaction or block does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The node refused a transaction or payment.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The node could not be reached.
    #[error("transport: {0}")]
    Transport(String),

    /// The node answered with something we could not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Any other RPC-level error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Error code reported by the node.
        code: i64,
        /// Error message reported by the node.
        message: String,
    },
}

/// Result alias for node calls.
pub type NodeResult<T> = Result<T, NodeError>;

/// The node and wallet operations commit/reveal publishing depends on.
///
/// All calls block. Timeouts and cancellation are up to the implementation.
pub trait NodeClient {
    /// Pays `amount` to `address` from the node's wallet.
    fn send_to_address(&self, address: &Address, amount: Amount) -> NodeResult<Txid>;

    /// Fetches a transaction by id.
    fn get_raw_transaction(&self, txid: &Txid) -> NodeResult<Transaction>;

    /// Returns the hash of the main-chain block at `height`.
    fn get_block_hash(&self, height: u64) -> NodeResult<BlockHash>;

    /// Fetches a full block.
    fn get_block(&self, hash: &BlockHash) -> NodeResult<Block>;

    /// Broadcasts a signed transaction.
    fn send_raw_transaction(&self, tx: &Transaction) -> NodeResult<Txid>;

    /// Returns the block containing `txid`, or `None` while unconfirmed.
    fn get_transaction_block_hash(&self, txid: &Txid) -> NodeResult<Option<BlockHash>>;

    /// Returns the height of the block with the given hash.
    fn get_block_height(&self, hash: &BlockHash) -> NodeResult<u64>;
}

macro_rules! forward_node_client {
    ($ty:ty) => {
        impl<T: NodeClient + ?Sized> NodeClient for $ty {
            fn send_to_address(&self, address: &Address, amount: Amount) -> NodeResult<Txid> {
                (**self).send_to_address(address, amount)
            }

            fn get_raw_transaction(&self, txid: &Txid) -> NodeResult<Transaction> {
                (**self).get_raw_transaction(txid)
            }

            fn get_block_hash(&self, height: u64) -> NodeResult<BlockHash> {
                (**self).get_block_hash(height)
            }

            fn get_block(&self, hash: &BlockHash) -> NodeResult<Block> {
                (**self).get_block(hash)
            }

            fn send_raw_transaction(&self, tx: &Transaction) -> NodeResult<Txid> {
                (**self).send_raw_transaction(tx)
            }

            fn get_transaction_block_hash(&self, txid: &Txid) -> NodeResult<Option<BlockHash>> {
                (**self).get_transaction_block_hash(txid)
            }

            fn get_block_height(&self, hash: &BlockHash) -> NodeResult<u64> {
                (**self).get_block_height(hash)
            }
        }
    };
}

forward_node_client!(&T);
forward_node_client!(Arc<T>);
forward_node_client!(Box<T>);
