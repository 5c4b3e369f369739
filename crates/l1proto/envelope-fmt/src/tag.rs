use std::{fmt, str::FromStr};

use bitcoin::hex::{DisplayHex, FromHex};
use thiserror::Error;

/// Length of a protocol tag in bytes.
pub const TAG_LEN: usize = 4;

/// The tag prepended to every blob written by the relayer (`"roll"`).
pub const ROLLKIT_TAG: ProtocolTag = ProtocolTag::new(*b"roll");

/// Bytes every envelope payload starts with.
///
/// Readers use it to tell our envelopes apart from unrelated scripts that
/// happen to have the same opcode shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolTag([u8; TAG_LEN]);

impl ProtocolTag {
    /// Wraps raw tag bytes. They need not be ASCII.
    pub const fn new(bytes: [u8; TAG_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw tag bytes.
    pub const fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }

    /// The tag as text, if it is ASCII.
    pub fn as_str(&self) -> Option<&str> {
        if self.0.is_ascii() {
            std::str::from_utf8(&self.0).ok()
        } else {
            None
        }
    }

    /// Returns `tag || blob`, the payload that goes into the envelope.
    pub fn tag_blob(&self, blob: &[u8]) -> Vec<u8> {
        [self.0.as_slice(), blob].concat()
    }

    /// Strips the tag off a payload, returning `None` if the payload does not
    /// start with it.
    pub fn strip<'p>(&self, payload: &'p [u8]) -> Option<&'p [u8]> {
        payload.strip_prefix(self.0.as_slice())
    }
}

impl Default for ProtocolTag {
    fn default() -> Self {
        ROLLKIT_TAG
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => f.write_str(text),
            None => write!(f, "0x{}", self.0.as_slice().as_hex()),
        }
    }
}

impl FromStr for ProtocolTag {
    type Err = InvalidProtocolTag;

    /// Accepts either exactly [`TAG_LEN`] ASCII characters or the `0x` hex
    /// form [`Display`](fmt::Display) uses for other tags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(hex) = s.strip_prefix("0x").filter(|h| h.len() == 2 * TAG_LEN) {
            return Vec::<u8>::from_hex(hex)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .map(Self)
                .ok_or(InvalidProtocolTag::InvalidHex);
        }
        if !s.is_ascii() {
            return Err(InvalidProtocolTag::NotAscii);
        }
        s.as_bytes()
            .try_into()
            .map(Self)
            .map_err(|_| InvalidProtocolTag::InvalidLength(s.len()))
    }
}

/// Why a string is not a valid [`ProtocolTag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidProtocolTag {
    /// Not exactly [`TAG_LEN`] characters.
    #[error("protocol tag must be exactly {TAG_LEN} characters (got {0})")]
    InvalidLength(usize),

    /// Contains non-ASCII characters.
    #[error("protocol tag must be ASCII")]
    NotAscii,

    /// Looks like the `0x` form but is not valid hex.
    #[error("invalid hex protocol tag")]
    InvalidHex,
}
