//! Core types for the fstate store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash: Generic 256-bit hash value
pub type Hash = [u8; 32];

/// FSId: content hash identity of a stored term or file object
///
/// Rendered as 64 lowercase hex characters in terms, file names and
/// diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FSId(pub Hash);

impl FSId {
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string. Returns `None` on any other input.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(FSId(bytes))
    }
}

impl From<Hash> for FSId {
    fn from(hash: Hash) -> Self {
        FSId(hash)
    }
}

impl fmt::Display for FSId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FSId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FSId({})", self.to_hex())
    }
}
