/// Content identifiers for the block store.
///
/// A CID is the BLAKE3 digest of a block's bytes, rendered as lowercase
/// hex. Every block written to the store is keyed by its CID, so puts are
/// idempotent and any bit flip in a block changes its identity.
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CasError;

/// A content identifier: the 32-byte BLAKE3 digest of a block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid([u8; 32]);

impl Cid {
    /// Compute the CID of a block's bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Wrap an existing 32-byte digest (e.g. a transaction hash) as a CID.
    pub fn from_bytes(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl FromStr for Cid {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| CasError::Serialization(format!("Invalid CID '{s}': {e}")))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CasError::Serialization(format!("Invalid CID '{s}': not 32 bytes")))?;
        Ok(Self(digest))
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e| D::Error::custom(format!("{e}")))
    }
}
