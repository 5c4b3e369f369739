use bitcoin::{
    ScriptBuf,
    blockdata::script,
    constants::MAX_SCRIPT_ELEMENT_SIZE,
    key::XOnlyPublicKey,
    opcodes::{
        OP_FALSE,
        all::{OP_CHECKSIG, OP_ENDIF, OP_IF},
    },
    script::PushBytesBuf,
};

use crate::{
    errors::EnvelopeBuildError,
    tag::{ProtocolTag, TAG_LEN},
};

/// Maximum number of data pushes a reader accepts between `OP_IF` and `OP_ENDIF`.
pub const MAX_PAYLOAD_PUSHES: usize = 10;

/// Largest blob (excluding the tag) that survives a write/read round trip.
pub const MAX_BLOB_SIZE: usize = MAX_SCRIPT_ELEMENT_SIZE * MAX_PAYLOAD_PUSHES - TAG_LEN;

/// Builds a tapscript leaf carrying an already tagged payload:
///
/// ```text
/// OP_FALSE OP_IF <chunk_1> ... <chunk_n> OP_ENDIF <reveal_key> OP_CHECKSIG
/// ```
///
/// Chunks hold at most [`MAX_SCRIPT_ELEMENT_SIZE`] bytes and are always
/// explicit pushes, one-byte ones included, so readers get back exactly the
/// bytes written. Payload length is not checked here; see
/// [`check_blob_size`].
///
/// # Errors
///
/// [`EnvelopeBuildError::PayloadChunkConversion`] if a chunk is rejected as
/// push data, which cannot happen for chunks of valid size.
pub fn build_leaf_script(
    payload: &[u8],
    reveal_key: &XOnlyPublicKey,
) -> Result<ScriptBuf, EnvelopeBuildError> {
    let opened = script::Builder::new()
        .push_opcode(OP_FALSE)
        .push_opcode(OP_IF);

    let filled = payload
        .chunks(MAX_SCRIPT_ELEMENT_SIZE)
        .try_fold(opened, |b, chunk| {
            chunk_push(chunk).map(|push| b.push_slice(push))
        })?;

    Ok(filled
        .push_opcode(OP_ENDIF)
        .push_x_only_key(reveal_key)
        .push_opcode(OP_CHECKSIG)
        .into_script())
}

fn chunk_push(chunk: &[u8]) -> Result<PushBytesBuf, EnvelopeBuildError> {
    PushBytesBuf::try_from(chunk.to_vec()).map_err(|_| EnvelopeBuildError::PayloadChunkConversion {
        chunk_size: chunk.len(),
    })
}

/// Prepends `tag` to `blob` and builds the leaf script for it.
///
/// # Errors
///
/// Same as [`build_leaf_script`].
pub fn build_tagged_leaf_script(
    tag: &ProtocolTag,
    blob: &[u8],
    reveal_key: &XOnlyPublicKey,
) -> Result<ScriptBuf, EnvelopeBuildError> {
    build_leaf_script(&tag.tag_blob(blob), reveal_key)
}

/// Checks that a blob is small enough to be extracted again once written.
pub fn check_blob_size(blob: &[u8]) -> Result<(), EnvelopeBuildError> {
    if blob.len() > MAX_BLOB_SIZE {
        return Err(EnvelopeBuildError::BlobTooLarge {
            len: blob.len(),
            max: MAX_BLOB_SIZE,
        });
    }
    Ok(())
}
