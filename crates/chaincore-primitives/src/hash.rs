//! 32-byte opaque hash with the two conventional wire orderings.
//!
//! Internal order is raw byte order (how the hash is produced by the
//! hashing function and how it sorts as a store key). Reversed order is the
//! big-endian display form used by block explorers and wire protocols that
//! print hashes "backwards". Conversion between the two is purely
//! presentational; the underlying bytes are never reinterpreted.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Reversed (big-endian display) byte order.
    pub fn to_reversed(&self) -> [u8; 32] {
        let mut out = self.0;
        out.reverse();
        out
    }

    pub fn from_reversed(bytes: [u8; 32]) -> Self {
        let mut out = bytes;
        out.reverse();
        Hash(out)
    }

    /// Hex string in reversed (display) order, matching block explorer output.
    pub fn to_hex_reversed(&self) -> String {
        hex::encode(self.to_reversed())
    }

    /// Hex string in internal (raw) byte order.
    pub fn to_hex_internal(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex_reversed(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s).map_err(|e| format!("hash hex decode: {e}"))?;
        if bytes.len() != 32 {
            return Err(format!("hash: expected 32 bytes, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self::from_reversed(arr))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex_reversed())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_reversed())
    }
}

/// Double SHA-256, the hash function used for block and transaction ids.
pub fn double_sha256(data: &[u8]) -> Hash {
    use sha2::{Digest, Sha256};
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_roundtrip() {
        let h = Hash([1u8; 32]);
        let rev = h.to_reversed();
        assert_eq!(Hash::from_reversed(rev), h);
    }

    #[test]
    fn hex_reversed_roundtrip() {
        let h = Hash::from_bytes(core::array::from_fn(|i| i as u8));
        let s = h.to_hex_reversed();
        let back = Hash::from_hex_reversed(&s).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn double_sha256_known_vector() {
        // SHA256(SHA256("")), a well-known constant.
        let h = double_sha256(b"");
        assert_eq!(
            h.to_hex_internal(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }
}
