use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const BYTES_LEN: usize = 32;

/// A 32-byte sha256 content hash.
///
/// The all-zero hash is reserved as the "empty" marker: a range summary
/// whose hash is zero means "this side has nothing in the range", never
/// "unknown".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct Hash {
    bytes: [u8; BYTES_LEN],
}

impl Hash {
    /// The empty (all-zero) hash.
    pub const ZERO: Self = Self {
        bytes: [0; BYTES_LEN],
    };

    /// Hash arbitrary bytes with sha256.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self {
            bytes: Sha256::digest(data).into(),
        }
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; BYTES_LEN]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BYTES_LEN] {
        &self.bytes
    }

    /// Whether this is the empty marker hash.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.bytes == [0; BYTES_LEN]
    }
}

impl From<[u8; BYTES_LEN]> for Hash {
    fn from(bytes: [u8; BYTES_LEN]) -> Self {
        Self { bytes }
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.bytes))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::ZERO
    }
}

#[derive(Debug, Error)]
#[error("invalid hash string: {0}")]
pub struct ParseHashError(String);

impl FromStr for Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|e| ParseHashError(e.to_string()))?;
        let bytes: [u8; BYTES_LEN] = raw
            .try_into()
            .map_err(|_| ParseHashError(format!("expected {BYTES_LEN} bytes")))?;
        Ok(Self { bytes })
    }
}
