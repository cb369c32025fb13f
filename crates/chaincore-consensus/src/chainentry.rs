//! The per-block header record: fixed-size, persisted, and cached.

use chaincore_primitives::{compact_to_target, target_to_bytes32, work_from_target, Hash};
use num_bigint::BigUint;
use num_traits::Zero;

use crate::constants::{CHAIN_ENTRY_BYTES, MEDIAN_TIME_SPAN};
use crate::types::BlockHeader;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEntry {
    pub hash: Hash,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub version: i32,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: u32,
    pub chainwork: BigUint,
}

impl ChainEntry {
    /// Builds the entry that would follow `parent` for the given header,
    /// computing chainwork as `parent.chainwork + 2^256/(target+1)`.
    pub fn from_header(header: &BlockHeader, height: u32, parent_chainwork: &BigUint) -> Self {
        let target = compact_to_target(header.bits);
        let work = work_from_target(&target).unwrap_or_else(|_| BigUint::zero());
        ChainEntry {
            hash: header.block_hash(),
            prev_hash: header.prev_hash,
            merkle_root: header.merkle_root,
            version: header.version,
            timestamp: header.timestamp,
            bits: header.bits,
            nonce: header.nonce,
            height,
            chainwork: parent_chainwork + work,
        }
    }

    pub fn genesis(header: &BlockHeader) -> Self {
        Self::from_header(header, 0, &BigUint::zero())
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_hash: self.prev_hash,
            merkle_root: self.merkle_root,
            timestamp: self.timestamp,
            bits: self.bits,
            nonce: self.nonce,
        }
    }

    pub fn target(&self) -> BigUint {
        compact_to_target(self.bits)
    }

    /// Work a block at this difficulty is expected to contribute:
    /// `2^256 / (target + 1)`.
    pub fn proof(&self) -> BigUint {
        work_from_target(&self.target()).unwrap_or_else(|_| BigUint::zero())
    }

    /// Fixed 116-byte on-disk encoding:
    /// `version(4) | prevHash(32) | merkleRoot(32) | ts(4) | bits(4) | nonce(4) | height(4) | chainwork(32 LE)`.
    pub fn serialize(&self) -> [u8; CHAIN_ENTRY_BYTES] {
        let mut out = [0u8; CHAIN_ENTRY_BYTES];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out[80..84].copy_from_slice(&self.height.to_le_bytes());
        let mut work_bytes = self.chainwork.to_bytes_le();
        work_bytes.resize(32, 0);
        out[84..116].copy_from_slice(&work_bytes[..32]);
        out
    }

    /// Deserializes a persisted entry. The block hash is *not* part of the
    /// persisted layout (it is derived from the wire header), so it is
    /// recomputed here rather than stored redundantly.
    pub fn deserialize(bytes: &[u8; CHAIN_ENTRY_BYTES]) -> Self {
        let version = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let mut prev = [0u8; 32];
        prev.copy_from_slice(&bytes[4..36]);
        let mut merkle = [0u8; 32];
        merkle.copy_from_slice(&bytes[36..68]);
        let timestamp = u32::from_le_bytes(bytes[68..72].try_into().unwrap());
        let bits = u32::from_le_bytes(bytes[72..76].try_into().unwrap());
        let nonce = u32::from_le_bytes(bytes[76..80].try_into().unwrap());
        let height = u32::from_le_bytes(bytes[80..84].try_into().unwrap());
        let chainwork = BigUint::from_bytes_le(&bytes[84..116]);

        let header = BlockHeader {
            version,
            prev_hash: Hash::from_bytes(prev),
            merkle_root: Hash::from_bytes(merkle),
            timestamp,
            bits,
            nonce,
        };
        ChainEntry {
            hash: header.block_hash(),
            prev_hash: header.prev_hash,
            merkle_root: header.merkle_root,
            version,
            timestamp,
            bits,
            nonce,
            height,
            chainwork,
        }
    }
}

/// Read-only lookups a [`ChainEntry`] needs to walk ancestors or determine
/// main-chain membership. Implemented by ChainDB; kept narrow so
/// `ChainEntry` has no dependency on the store crate.
pub trait EntrySource {
    fn entry_by_hash(&self, hash: &Hash) -> Option<ChainEntry>;
    fn hash_at_height(&self, height: u32) -> Option<Hash>;
    /// Forward pointer: does `hash` have a known successor on the main
    /// chain? Used by `is_main_chain` without needing the tip height.
    fn has_next(&self, hash: &Hash) -> bool;
    fn tip_hash(&self) -> Hash;
}

impl ChainEntry {
    /// Ancestor at `height`: a direct `H` lookup if this entry is on the
    /// main chain, otherwise a walk back through `prev_hash` links.
    pub fn get_ancestor<S: EntrySource>(&self, height: u32, src: &S) -> Option<ChainEntry> {
        if height > self.height {
            return None;
        }
        if self.is_main_chain(src) {
            let hash = src.hash_at_height(height)?;
            return src.entry_by_hash(&hash);
        }
        let mut cur = self.clone();
        while cur.height > height {
            cur = src.entry_by_hash(&cur.prev_hash)?;
        }
        Some(cur)
    }

    /// Median of timestamps of self and up to 10 ancestors (11 samples once
    /// deep enough, fewer near genesis).
    pub fn median_time_past<S: EntrySource>(&self, src: &S) -> u32 {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut cur = Some(self.clone());
        for _ in 0..MEDIAN_TIME_SPAN {
            match cur {
                Some(entry) => {
                    timestamps.push(entry.timestamp);
                    cur = if entry.height == 0 {
                        None
                    } else {
                        src.entry_by_hash(&entry.prev_hash)
                    };
                }
                None => break,
            }
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }

    /// Genesis/tip short-circuit, height-cache check, then forward-pointer
    /// existence, matching the three-tier main-chain membership test.
    pub fn is_main_chain<S: EntrySource>(&self, src: &S) -> bool {
        if self.hash == src.tip_hash() || self.height == 0 {
            return true;
        }
        if let Some(h) = src.hash_at_height(self.height) {
            if h == self.hash {
                return true;
            }
        }
        src.has_next(&self.hash)
    }

    pub fn target_bytes(&self) -> [u8; 32] {
        target_to_bytes32(&self.target()).unwrap_or([0u8; 32])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeSource {
        by_hash: HashMap<Hash, ChainEntry>,
        by_height: HashMap<u32, Hash>,
        tip: Hash,
    }

    impl EntrySource for FakeSource {
        fn entry_by_hash(&self, hash: &Hash) -> Option<ChainEntry> {
            self.by_hash.get(hash).cloned()
        }
        fn hash_at_height(&self, height: u32) -> Option<Hash> {
            self.by_height.get(&height).cloned()
        }
        fn has_next(&self, hash: &Hash) -> bool {
            self.by_hash.values().any(|e| &e.prev_hash == hash)
        }
        fn tip_hash(&self) -> Hash {
            self.tip
        }
    }

    fn chain_of(n: u32) -> FakeSource {
        let mut by_hash = HashMap::new();
        let mut by_height = HashMap::new();
        let mut prev = Hash::ZERO;
        let mut work = BigUint::zero();
        let mut tip = Hash::ZERO;
        for h in 0..n {
            let header = BlockHeader {
                version: 1,
                prev_hash: prev,
                merkle_root: Hash::ZERO,
                timestamp: 1_600_000_000 + h * 600,
                bits: 0x1d00ffff,
                nonce: h,
            };
            let entry = ChainEntry::from_header(&header, h, &work);
            work = entry.chainwork.clone();
            tip = entry.hash;
            prev = entry.hash;
            by_height.insert(h, entry.hash);
            by_hash.insert(entry.hash, entry);
        }
        FakeSource { by_hash, by_height, tip }
    }

    #[test]
    fn serialize_roundtrip() {
        let src = chain_of(3);
        let entry = src.entry_by_hash(&src.tip).unwrap();
        let bytes = entry.serialize();
        let back = ChainEntry::deserialize(&bytes);
        assert_eq!(back.hash, entry.hash);
        assert_eq!(back.chainwork, entry.chainwork);
        assert_eq!(back.height, entry.height);
    }

    #[test]
    fn ancestor_walk_on_main_chain() {
        let src = chain_of(5);
        let tip = src.entry_by_hash(&src.tip).unwrap();
        let anc = tip.get_ancestor(2, &src).unwrap();
        assert_eq!(anc.height, 2);
    }

    #[test]
    fn median_time_past_is_exact_with_few_ancestors() {
        let src = chain_of(3);
        let tip = src.entry_by_hash(&src.tip).unwrap();
        let mtp = tip.median_time_past(&src);
        // 3 samples -> sorted middle one.
        assert_eq!(mtp, 1_600_000_000 + 600);
    }
}
