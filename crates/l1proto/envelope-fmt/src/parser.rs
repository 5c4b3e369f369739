use bitcoin::{
    Script,
    opcodes::all::{OP_CHECKSIG, OP_ENDIF, OP_IF},
    script::Instruction,
};

use crate::{builder::MAX_PAYLOAD_PUSHES, tag::ProtocolTag};

/// Outcome of matching a script against the leaf template.
///
/// `NotMatched` is not an error: scanners walk arbitrary scripts and most of
/// them are not ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The script is one of ours; holds the blob with the tag stripped.
    Matched(Vec<u8>),

    /// The script has a different shape or a foreign tag.
    NotMatched,
}

impl Extraction {
    /// Returns whether a blob was recovered.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// Borrows the recovered blob, if any.
    pub fn blob(&self) -> Option<&[u8]> {
        match self {
            Self::Matched(blob) => Some(blob),
            Self::NotMatched => None,
        }
    }

    /// Converts into the recovered blob, if any.
    pub fn into_blob(self) -> Option<Vec<u8>> {
        match self {
            Self::Matched(blob) => Some(blob),
            Self::NotMatched => None,
        }
    }
}

/// Raw contents of a script with the leaf shape, before tag filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEnvelope {
    /// Concatenation of the pushes between `OP_IF` and `OP_ENDIF`.
    pub payload: Vec<u8>,

    /// The single push following `OP_ENDIF`.
    pub pubkey: Vec<u8>,
}

/// Template slots, in the order they must be filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    OpFalse,
    OpIf,
    Payload { pushes: usize },
    Pubkey,
    Checksig,
    Complete,
}

/// Marker for a token that does not fit the template.
#[derive(Debug)]
struct Mismatch;

#[derive(Debug)]
struct TemplateMatcher {
    slot: Slot,
    payload: Vec<u8>,
    pubkey: Vec<u8>,
}

impl TemplateMatcher {
    fn new() -> Self {
        Self {
            slot: Slot::OpFalse,
            payload: Vec::new(),
            pubkey: Vec::new(),
        }
    }

    /// Advances by one token.
    fn step(&mut self, instr: Instruction<'_>) -> Result<(), Mismatch> {
        self.slot = match (self.slot, instr) {
            // OP_FALSE is an empty push.
            (Slot::OpFalse, Instruction::PushBytes(b)) if b.is_empty() => Slot::OpIf,
            (Slot::OpIf, Instruction::Op(OP_IF)) => Slot::Payload { pushes: 0 },
            (Slot::Payload { pushes }, Instruction::PushBytes(b)) => {
                if pushes >= MAX_PAYLOAD_PUSHES {
                    return Err(Mismatch);
                }
                self.payload.extend_from_slice(b.as_bytes());
                Slot::Payload { pushes: pushes + 1 }
            }
            (Slot::Payload { .. }, Instruction::Op(OP_ENDIF)) => Slot::Pubkey,
            (Slot::Pubkey, Instruction::PushBytes(b)) => {
                self.pubkey = b.as_bytes().to_vec();
                Slot::Checksig
            }
            (Slot::Checksig, Instruction::Op(OP_CHECKSIG)) => Slot::Complete,
            _ => return Err(Mismatch),
        };
        Ok(())
    }

    fn finish(self) -> Option<LeafEnvelope> {
        (self.slot == Slot::Complete).then_some(LeafEnvelope {
            payload: self.payload,
            pubkey: self.pubkey,
        })
    }
}

/// Matches `script` against the leaf template without looking at the payload.
///
/// Returns `None` for anything that is not exactly
/// `OP_FALSE OP_IF <0..=10 pushes> OP_ENDIF <push> OP_CHECKSIG`, including
/// scripts with trailing tokens and truncated or malformed pushes.
pub fn parse_leaf_script(script: &Script) -> Option<LeafEnvelope> {
    let mut matcher = TemplateMatcher::new();
    for instr in script.instructions() {
        matcher.step(instr.ok()?).ok()?;
    }
    matcher.finish()
}

/// Extracts the blob embedded in `script`, if it was written with `tag`.
pub fn extract_blob(script: &Script, tag: &ProtocolTag) -> Extraction {
    let Some(envelope) = parse_leaf_script(script) else {
        return Extraction::NotMatched;
    };

    match tag.strip(&envelope.payload) {
        Some(blob) => Extraction::Matched(blob.to_vec()),
        None => Extraction::NotMatched,
    }
}
