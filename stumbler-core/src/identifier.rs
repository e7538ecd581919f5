//! Typed beacon identifiers.
//!
//! Beacon formats use 1-, 2-, 6-, 10- and 16-byte identifiers. The type is
//! chosen purely by byte length, so callers must not assume a fixed width.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::hex_encode;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identifier {
    /// One or two bytes, big-endian unsigned (major/minor, frame counters).
    Int(u16),
    /// Exactly sixteen bytes.
    Uuid(Uuid),
    /// Any other length, as `0x`-prefixed lowercase hex.
    Hex(String),
}

impl Identifier {
    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Identifier::Uuid(u) => Some(u),
            _ => None,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(v) => write!(f, "{v}"),
            Identifier::Uuid(u) => write!(f, "{}", u.hyphenated()),
            Identifier::Hex(s) => f.write_str(s),
        }
    }
}

/// Convert raw bytes to an identifier. Little-endian input is reversed first.
pub fn bytes_to_identifier(bytes: &[u8], little_endian: bool) -> Identifier {
    let mut normalized = bytes.to_vec();
    if little_endian {
        normalized.reverse();
    }

    match normalized.len() {
        0..=2 => {
            let value = normalized
                .iter()
                .fold(0u16, |acc, &b| (acc << 8) | b as u16);
            Identifier::Int(value)
        }
        16 => {
            let mut high = [0u8; 8];
            let mut low = [0u8; 8];
            high.copy_from_slice(&normalized[..8]);
            low.copy_from_slice(&normalized[8..]);
            Identifier::Uuid(Uuid::from_u64_pair(
                u64::from_be_bytes(high),
                u64::from_be_bytes(low),
            ))
        }
        _ => Identifier::Hex(format!("0x{}", hex_encode(&normalized))),
    }
}
