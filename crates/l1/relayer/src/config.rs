//! Relayer configuration.
//!
//! Loaded from TOML. Key material is always supplied here; nothing is
//! compiled into the binary.
//!
//! ```toml
//! network = "regtest"
//! protocol_tag = "roll"
//! commit_amount_sat = 100000
//! reveal_fee_sat = 99000
//!
//! [keys]
//! reveal_wif = "cV..."
//!
//! [rpc]
//! url = "http://localhost:18332"
//! user = "rpcuser"
//! password = "rpcpass"
//! ```

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use bitcoin::{Address, Amount, Network, NetworkKind, ScriptBuf, key::XOnlyPublicKey};
use btcda_envelope_fmt::ProtocolTag;
use btcda_taproot::KeypairSigner;
use serde::Deserialize;
use thiserror::Error;

/// Default amount paid to each commit address (0.001 BTC).
pub const DEFAULT_COMMIT_AMOUNT_SAT: u64 = 100_000;

/// Default fee left to miners by the reveal, leaving a 1000 sat output.
pub const DEFAULT_REVEAL_FEE_SAT: u64 = 99_000;

/// Default RPC request timeout.
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// Smallest output value relayed for a P2TR output.
pub const P2TR_DUST_LIMIT_SAT: u64 = 330;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config is not valid TOML for this schema.
    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),

    /// Unknown network name.
    #[error("unknown network {0:?}")]
    InvalidNetwork(String),

    /// The reveal key is not valid WIF.
    #[error("invalid reveal key: {0}")]
    InvalidKey(String),

    /// The reveal key was encoded for a different network.
    #[error("reveal key is for {found:?} but network is {network}")]
    KeyNetworkMismatch {
        /// Configured network.
        network: Network,
        /// Network kind encoded in the WIF.
        found: NetworkKind,
    },

    /// The internal key is not a valid x-only public key.
    #[error("invalid internal pubkey: {0}")]
    InvalidInternalKey(String),

    /// The reveal destination is not a valid address for the network.
    #[error("invalid reveal destination: {0}")]
    InvalidDestination(String),

    /// The reveal fee consumes the whole commit amount.
    #[error("reveal fee {fee} must be below commit amount {amount}")]
    FeeTooHigh {
        /// Configured fee.
        fee: Amount,
        /// Configured commit amount.
        amount: Amount,
    },

    /// The reveal output would be below the dust limit.
    #[error("reveal output {0} is below the dust limit")]
    DustOutput(Amount),

    /// An RPC connection was requested but not configured.
    #[error("missing [rpc] section")]
    MissingRpc,

    /// A zero request timeout would fail every RPC call.
    #[error("rpc timeout_secs must be at least 1")]
    ZeroTimeout,
}

/// Raw relayer configuration, as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayerConfig {
    /// `bitcoin`, `testnet`, `testnet4`, `signet` or `regtest`.
    pub network: String,

    /// Tag prepended to every blob.
    #[serde(default)]
    pub protocol_tag: ProtocolTag,

    /// Amount paid to each commit address.
    #[serde(default = "default_commit_amount")]
    pub commit_amount_sat: u64,

    /// Fee paid by each reveal.
    #[serde(default = "default_reveal_fee")]
    pub reveal_fee_sat: u64,

    /// Where reveal outputs go. Defaults to a key-path output of the reveal
    /// key.
    #[serde(default)]
    pub reveal_destination: Option<String>,

    /// Directory for pending commit records. In-memory when unset.
    #[serde(default)]
    pub commit_store_dir: Option<PathBuf>,

    /// Key material.
    pub keys: KeyConfig,

    /// Node connection.
    #[serde(default)]
    pub rpc: Option<RpcConfig>,
}

/// Key material for signing reveals.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    /// WIF private key whose x-only key guards the leaf script.
    pub reveal_wif: String,

    /// Hex x-only internal key. Defaults to the reveal key.
    #[serde(default)]
    pub internal_pubkey: Option<String>,
}

impl fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyConfig")
            .field("reveal_wif", &"<redacted>")
            .field("internal_pubkey", &self.internal_pubkey)
            .finish()
    }
}

/// bitcoind JSON-RPC connection settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcConfig {
    /// Endpoint URL, e.g. `http://localhost:18332`.
    pub url: String,

    /// RPC user.
    #[serde(default)]
    pub user: Option<String>,

    /// RPC password.
    #[serde(default)]
    pub password: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

impl fmt::Debug for RpcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_commit_amount() -> u64 {
    DEFAULT_COMMIT_AMOUNT_SAT
}

fn default_reveal_fee() -> u64 {
    DEFAULT_REVEAL_FEE_SAT
}

fn default_rpc_timeout() -> u64 {
    DEFAULT_RPC_TIMEOUT_SECS
}

/// Validated, typed parameters for a relayer.
#[derive(Debug, Clone)]
pub struct RelayerParams {
    /// Network addresses are derived for.
    pub network: Network,

    /// Tag prepended to blobs.
    pub tag: ProtocolTag,

    /// Amount paid to each commit address.
    pub commit_amount: Amount,

    /// Fee paid by each reveal.
    pub reveal_fee: Amount,

    /// Reveal output script; `None` pays back to the reveal key.
    pub reveal_destination: Option<ScriptBuf>,

    /// Internal key; `None` uses the reveal key.
    pub internal_key: Option<XOnlyPublicKey>,
}

impl RelayerParams {
    /// Defaults for `network` with the reveal key as internal key.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            tag: ProtocolTag::default(),
            commit_amount: Amount::from_sat(DEFAULT_COMMIT_AMOUNT_SAT),
            reveal_fee: Amount::from_sat(DEFAULT_REVEAL_FEE_SAT),
            reveal_destination: None,
            internal_key: None,
        }
    }

    /// Value of the reveal output.
    pub fn reveal_value(&self) -> Result<Amount, ConfigError> {
        check_amounts(self.commit_amount, self.reveal_fee)
    }
}

fn check_amounts(amount: Amount, fee: Amount) -> Result<Amount, ConfigError> {
    let value = amount
        .checked_sub(fee)
        .filter(|v| *v > Amount::ZERO)
        .ok_or(ConfigError::FeeTooHigh { fee, amount })?;
    if value.to_sat() < P2TR_DUST_LIMIT_SAT {
        return Err(ConfigError::DustOutput(value));
    }
    Ok(value)
}

impl RelayerConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses the configured network.
    pub fn network(&self) -> Result<Network, ConfigError> {
        Network::from_str(&self.network).map_err(|_| ConfigError::InvalidNetwork(self.network.clone()))
    }

    /// Validates everything except the signing key.
    pub fn params(&self) -> Result<RelayerParams, ConfigError> {
        let network = self.network()?;
        let commit_amount = Amount::from_sat(self.commit_amount_sat);
        let reveal_fee = Amount::from_sat(self.reveal_fee_sat);
        check_amounts(commit_amount, reveal_fee)?;

        let internal_key = self
            .keys
            .internal_pubkey
            .as_deref()
            .map(|s| {
                XOnlyPublicKey::from_str(s).map_err(|e| ConfigError::InvalidInternalKey(e.to_string()))
            })
            .transpose()?;

        let reveal_destination = self
            .reveal_destination
            .as_deref()
            .map(|s| parse_destination(s, network))
            .transpose()?;

        Ok(RelayerParams {
            network,
            tag: self.protocol_tag,
            commit_amount,
            reveal_fee,
            reveal_destination,
            internal_key,
        })
    }

    /// The node connection settings, checked for usability.
    pub fn rpc(&self) -> Result<&RpcConfig, ConfigError> {
        let rpc = self.rpc.as_ref().ok_or(ConfigError::MissingRpc)?;
        if rpc.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(rpc)
    }

    /// Loads the reveal signer, checking the key against the network.
    pub fn signer(&self) -> Result<KeypairSigner, ConfigError> {
        let network = self.network()?;
        let (signer, key) = KeypairSigner::from_wif(&self.keys.reveal_wif)
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        if key.network != NetworkKind::from(network) {
            return Err(ConfigError::KeyNetworkMismatch {
                network,
                found: key.network,
            });
        }
        Ok(signer)
    }
}

fn parse_destination(s: &str, network: Network) -> Result<ScriptBuf, ConfigError> {
    let address = Address::from_str(s)
        .map_err(|e| ConfigError::InvalidDestination(e.to_string()))?
        .require_network(network)
        .map_err(|e| ConfigError::InvalidDestination(e.to_string()))?;
    Ok(address.script_pubkey())
}
