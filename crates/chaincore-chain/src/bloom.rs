//! Caller-supplied filter for [`Chain::scan`](crate::chain::Chain::scan):
//! a fixed-size bit array tested and grown with `k` independent hash
//! functions, in the spirit of BIP37. Built on [`chaincore_crypto::sha256`]
//! rather than a dedicated hashing scheme since a false-positive rate this
//! coarse doesn't need one.

/// A growable Bloom filter over byte strings (txids, outpoints, scripts).
#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
}

impl BloomFilter {
    /// `bits` is the bit-array size in bytes; `hash_funcs` the number of
    /// independent hashes `k`. `tweak` lets independent filters watching
    /// the same scan diverge instead of colliding identically.
    pub fn new(bits: usize, hash_funcs: u32, tweak: u32) -> Self {
        BloomFilter { bits: vec![0u8; bits.max(1)], hash_funcs: hash_funcs.max(1), tweak }
    }

    fn hash(&self, n: u32, data: &[u8]) -> usize {
        let mut input = Vec::with_capacity(data.len() + 8);
        input.extend_from_slice(&n.to_le_bytes());
        input.extend_from_slice(&self.tweak.to_le_bytes());
        input.extend_from_slice(data);
        let digest = chaincore_crypto::sha256(&input);
        let idx = u32::from_le_bytes(digest[0..4].try_into().unwrap());
        (idx as usize) % (self.bits.len() * 8)
    }

    pub fn insert(&mut self, data: &[u8]) {
        for n in 0..self.hash_funcs {
            let bit = self.hash(n, data);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        (0..self.hash_funcs).all(|n| {
            let bit = self.hash(n, data);
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_values_are_found() {
        let mut filter = BloomFilter::new(64, 4, 0);
        filter.insert(b"some-txid");
        assert!(filter.contains(b"some-txid"));
    }

    #[test]
    fn unrelated_value_usually_absent_from_sparse_filter() {
        let mut filter = BloomFilter::new(1024, 4, 0);
        filter.insert(b"one");
        assert!(!filter.contains(b"completely-different-value"));
    }
}
