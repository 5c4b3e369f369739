use thiserror::Error;

/// Leaf script construction failures.
#[derive(Debug, Error)]
pub enum EnvelopeBuildError {
    /// A payload chunk was rejected as push data.
    #[error("payload chunk of {chunk_size} bytes is not valid push data")]
    PayloadChunkConversion {
        /// Size of the rejected chunk.
        chunk_size: usize,
    },

    /// The blob would not fit into the pushes a reader accepts.
    #[error("blob of {len} bytes exceeds the {max} byte limit")]
    BlobTooLarge {
        /// Size of the rejected blob.
        len: usize,
        /// Largest blob that can be read back.
        max: usize,
    },
}
