// Version Identifiers
//
// A version is the 32-byte root of a committed state. Versions are
// produced by a backend commit and never mutated afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of a version identifier in bytes.
pub const VERSION_LEN: usize = 32;

/// Root of the empty state.
///
/// Never written to a version log. Opening it always yields an empty
/// state, which is how a fresh backend starts.
pub const GENESIS: Version = Version([0u8; VERSION_LEN]);

/// Content-derived identifier of a committed state snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Version(pub [u8; VERSION_LEN]);

/// Errors produced when parsing a version from text.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseVersionError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

impl Version {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; VERSION_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; VERSION_LEN] {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        *self == GENESIS
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.to_hex())
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(digits)?;
        Version::from_slice(&bytes).ok_or(ParseVersionError::Length(bytes.len()))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
