//! bitcoind JSON-RPC client.

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use bitcoin::{
    Address, Amount, Block, BlockHash, Transaction, Txid,
    consensus::encode::{deserialize_hex, serialize_hex},
};
use reqwest::{StatusCode, blocking::Client};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::*;

use crate::{
    config::RpcConfig,
    node::{NodeClient, NodeError, NodeResult},
};

/// `RPC_INVALID_ADDRESS_OR_KEY`: unknown txid or block hash.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// `RPC_INVALID_PARAMETER`: e.g. block height out of range.
const RPC_INVALID_PARAMETER: i64 = -8;
/// `RPC_WALLET_INSUFFICIENT_FUNDS`.
const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;
/// `RPC_VERIFY_ERROR`.
const RPC_VERIFY_ERROR: i64 = -25;
/// `RPC_VERIFY_REJECTED`.
const RPC_VERIFY_REJECTED: i64 = -26;
/// `RPC_VERIFY_ALREADY_IN_CHAIN`.
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;

/// Maps a bitcoind error code onto the node error taxonomy.
fn classify(code: i64, message: String) -> NodeError {
    match code {
        RPC_INVALID_ADDRESS_OR_KEY | RPC_INVALID_PARAMETER => NodeError::NotFound(message),
        RPC_WALLET_INSUFFICIENT_FUNDS
        | RPC_VERIFY_ERROR
        | RPC_VERIFY_REJECTED
        | RPC_VERIFY_ALREADY_IN_CHAIN => NodeError::Rejected(message),
        code => NodeError::Rpc { code, message },
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

impl RpcResponse {
    fn into_result<T: DeserializeOwned>(self) -> NodeResult<T> {
        if let Some(err) = self.error {
            return Err(classify(err.code, err.message));
        }
        serde_json::from_value(self.result).map_err(|e| NodeError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTransaction {
    #[serde(default)]
    blockhash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockHeaderInfo {
    height: u64,
}

/// Blocking JSON-RPC 1.0 client for bitcoind with a loaded wallet.
///
/// `getrawtransaction` on confirmed transactions needs `-txindex` unless the
/// transaction belongs to the wallet.
pub struct BitcoindRpcClient {
    client: Client,
    url: String,
    user: Option<String>,
    password: Option<String>,
    next_id: AtomicU64,
}

impl fmt::Debug for BitcoindRpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcoindRpcClient")
            .field("url", &self.url)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl BitcoindRpcClient {
    /// Builds a client from connection settings.
    pub fn new(config: &RpcConfig) -> NodeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NodeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Issues one RPC call and decodes its result.
    pub fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> NodeResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(%method, id, "rpc call");

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.password.as_ref());
        }

        let resp = req
            .send()
            .map_err(|e| NodeError::Transport(e.to_string()))?;

        // bitcoind reports RPC errors with 4xx/5xx statuses and a JSON body,
        // so only auth failures are treated as transport errors here.
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NodeError::Transport(format!("{method}: {status}")));
        }

        let text = resp
            .text()
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let decoded: RpcResponse = serde_json::from_str(&text).map_err(|e| {
            NodeError::InvalidResponse(format!("{method} ({status}): {e}"))
        })?;

        decoded.into_result()
    }
}

fn decode_hex<T: bitcoin::consensus::Decodable>(hex: &str) -> NodeResult<T> {
    deserialize_hex(hex).map_err(|e| NodeError::InvalidResponse(e.to_string()))
}

fn parse_hash<T: FromStr>(s: &str) -> NodeResult<T>
where
    T::Err: fmt::Display,
{
    T::from_str(s).map_err(|e| NodeError::InvalidResponse(e.to_string()))
}

impl NodeClient for BitcoindRpcClient {
    fn send_to_address(&self, address: &Address, amount: Amount) -> NodeResult<Txid> {
        let txid: String = self.call(
            "sendtoaddress",
            json!([address.to_string(), amount.to_btc()]),
        )?;
        parse_hash(&txid)
    }

    fn get_raw_transaction(&self, txid: &Txid) -> NodeResult<Transaction> {
        let hex: String = self.call("getrawtransaction", json!([txid.to_string(), false]))?;
        decode_hex(&hex)
    }

    fn get_block_hash(&self, height: u64) -> NodeResult<BlockHash> {
        let hash: String = self.call("getblockhash", json!([height]))?;
        parse_hash(&hash)
    }

    fn get_block(&self, hash: &BlockHash) -> NodeResult<Block> {
        let hex: String = self.call("getblock", json!([hash.to_string(), 0]))?;
        decode_hex(&hex)
    }

    fn send_raw_transaction(&self, tx: &Transaction) -> NodeResult<Txid> {
        let txid: String = self.call("sendrawtransaction", json!([serialize_hex(tx)]))?;
        parse_hash(&txid)
    }

    fn get_transaction_block_hash(&self, txid: &Txid) -> NodeResult<Option<BlockHash>> {
        let info: VerboseTransaction =
            self.call("getrawtransaction", json!([txid.to_string(), true]))?;
        info.blockhash.as_deref().map(parse_hash::<BlockHash>).transpose()
    }

    fn get_block_height(&self, hash: &BlockHash) -> NodeResult<u64> {
        let header: BlockHeaderInfo = self.call("getblockheader", json!([hash.to_string(), true]))?;
        Ok(header.height)
    }
}
