//! Tapscript signing.

use std::fmt;

use bitcoin::{
    PrivateKey, Script, Transaction, TxOut,
    hashes::Hash,
    key::{Keypair, XOnlyPublicKey},
    secp256k1::{All, Message, Secp256k1, SecretKey, Verification},
    sighash::{Prevouts, SighashCache, TapSighash, TapSighashType},
    taproot::{self, LeafVersion, TapLeafHash},
};

use crate::{
    errors::{SigningError, VerifyError},
    verify::verify_script_spend_with,
};

/// Source of script-path signatures for reveal transactions.
///
/// Implementations may hold the key in process or forward to a remote
/// signer; callers only see the x-only key and the resulting signature.
pub trait Signer {
    /// Key committed in the leaf script's `<key> OP_CHECKSIG`.
    fn x_only_public_key(&self) -> XOnlyPublicKey;

    /// Signs input `input_index` of `tx` for a script-path spend of
    /// `leaf_script`.
    ///
    /// `prevouts` must hold the spent output of every input, in input order.
    fn sign_tapscript(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevouts: &[TxOut],
        leaf_script: &Script,
        sighash_type: TapSighashType,
    ) -> Result<taproot::Signature, SigningError>;
}

/// Computes the BIP-341 signature hash for a script-path spend.
pub fn tapscript_sighash(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
    leaf_hash: TapLeafHash,
    sighash_type: TapSighashType,
) -> Result<TapSighash, bitcoin::sighash::TaprootError> {
    SighashCache::new(tx).taproot_script_spend_signature_hash(
        input_index,
        &Prevouts::All(prevouts),
        leaf_hash,
        sighash_type,
    )
}

/// [`Signer`] backed by an in-memory secp256k1 keypair.
///
/// Signatures use no auxiliary randomness, so signing the same transaction
/// twice yields the same bytes.
pub struct KeypairSigner {
    secp: Secp256k1<All>,
    keypair: Keypair,
}

impl KeypairSigner {
    /// Creates a signer from a raw secret key.
    pub fn new(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        Self { secp, keypair }
    }

    /// Creates a signer from a decoded private key.
    pub fn from_private_key(key: &PrivateKey) -> Self {
        Self::new(key.inner)
    }

    /// Parses a WIF-encoded key.
    ///
    /// Returns the signer together with the decoded key so callers can check
    /// its network kind against their configuration.
    pub fn from_wif(wif: &str) -> Result<(Self, PrivateKey), SigningError> {
        let key = PrivateKey::from_wif(wif).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok((Self::from_private_key(&key), key))
    }

    /// Secp context shared with derivation and verification.
    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }
}

impl fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("pubkey", &self.x_only_public_key())
            .finish_non_exhaustive()
    }
}

impl Signer for KeypairSigner {
    fn x_only_public_key(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    fn sign_tapscript(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevouts: &[TxOut],
        leaf_script: &Script,
        sighash_type: TapSighashType,
    ) -> Result<taproot::Signature, SigningError> {
        let leaf_hash = TapLeafHash::from_script(leaf_script, LeafVersion::TapScript);
        let sighash = tapscript_sighash(tx, input_index, prevouts, leaf_hash, sighash_type)?;
        let msg = Message::from_digest(sighash.to_byte_array());

        let signature = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        Ok(taproot::Signature {
            signature,
            sighash_type,
        })
    }
}

/// Signs and then checks the signature against a fully assembled witness.
///
/// Used by callers that want signer failures reported before broadcast rather
/// than as a node rejection.
pub fn sign_and_verify<S: Signer + ?Sized, C: Verification>(
    signer: &S,
    secp: &Secp256k1<C>,
    tx: &mut Transaction,
    input_index: usize,
    prevouts: &[TxOut],
    leaf_script: &Script,
    control_block: &taproot::ControlBlock,
) -> Result<(), SigningError> {
    let signature = signer.sign_tapscript(
        tx,
        input_index,
        prevouts,
        leaf_script,
        TapSighashType::Default,
    )?;

    let input = tx
        .input
        .get_mut(input_index)
        .ok_or(VerifyError::MissingInput(input_index))?;
    input.witness.clear();
    input.witness.push(signature.to_vec());
    input.witness.push(leaf_script.as_bytes());
    input.witness.push(control_block.serialize());

    verify_script_spend_with(secp, tx, input_index, prevouts)?;
    Ok(())
}
