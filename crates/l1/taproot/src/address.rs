//! Single-leaf taproot commitments.

use bitcoin::{
    Address, Network, Script, ScriptBuf,
    key::{TweakedPublicKey, UntweakedPublicKey},
    secp256k1::{Secp256k1, Verification},
    taproot::{
        ControlBlock, LeafVersion, TapLeafHash, TapNodeHash, TaprootBuilder, TaprootSpendInfo,
    },
};

use crate::errors::DeriveError;

/// Everything needed to fund and later spend a single-leaf taproot output.
#[derive(Debug, Clone)]
pub struct DerivedAddress {
    leaf_script: ScriptBuf,
    spend_info: TaprootSpendInfo,
    control_block: ControlBlock,
    address: Address,
}

impl DerivedAddress {
    /// The committed leaf script.
    pub fn leaf_script(&self) -> &Script {
        &self.leaf_script
    }

    /// Hash of the committed leaf.
    pub fn leaf_hash(&self) -> TapLeafHash {
        TapLeafHash::from_script(&self.leaf_script, LeafVersion::TapScript)
    }

    /// Merkle root of the one-leaf tree.
    pub fn merkle_root(&self) -> Option<TapNodeHash> {
        self.spend_info.merkle_root()
    }

    /// Untweaked internal key.
    pub fn internal_key(&self) -> UntweakedPublicKey {
        self.spend_info.internal_key()
    }

    /// Internal key tweaked by the merkle root.
    pub fn output_key(&self) -> TweakedPublicKey {
        self.spend_info.output_key()
    }

    /// Control block proving the leaf under [`Self::output_key`].
    pub fn control_block(&self) -> &ControlBlock {
        &self.control_block
    }

    /// Bech32m address for the output key.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// `OP_1 <output_key>` script the commit output pays to.
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }
}

/// Commits `leaf_script` as the only leaf under `internal_key`.
///
/// The same inputs always produce the same output key, so the reveal side can
/// rebuild the commitment without storing anything but the leaf inputs.
pub fn derive_address<C: Verification>(
    secp: &Secp256k1<C>,
    leaf_script: ScriptBuf,
    internal_key: UntweakedPublicKey,
    network: Network,
) -> Result<DerivedAddress, DeriveError> {
    let spend_info = TaprootBuilder::new()
        .add_leaf(0, leaf_script.clone())?
        .finalize(secp, internal_key)
        .map_err(|_| DeriveError::Finalize)?;

    let control_block = spend_info
        .control_block(&(leaf_script.clone(), LeafVersion::TapScript))
        .ok_or(DeriveError::MissingControlBlock)?;

    let address = Address::p2tr_tweaked(spend_info.output_key(), network);

    Ok(DerivedAddress {
        leaf_script,
        spend_info,
        control_block,
        address,
    })
}
