//! Tags serialize as their [`Display`](std::fmt::Display) text in
//! human-readable formats (config files, JSON) and as a fixed
//! `[u8; TAG_LEN]` otherwise. Non-ASCII tags use the `0x` hex form as text.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::tag::{ProtocolTag, TAG_LEN};

impl Serialize for ProtocolTag {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.collect_str(self)
        } else {
            self.as_bytes().serialize(s)
        }
    }
}

impl<'de> Deserialize<'de> for ProtocolTag {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let text = String::deserialize(d)?;
            text.parse().map_err(D::Error::custom)
        } else {
            <[u8; TAG_LEN]>::deserialize(d).map(ProtocolTag::new)
        }
    }
}
