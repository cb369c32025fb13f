//! Small LRU of known-bad block hashes. Any block whose parent is marked
//! invalid is rejected without re-validation, cascading the mark to its own
//! hash.

use std::num::NonZeroUsize;

use chaincore_primitives::Hash;
use lru::LruCache;

const DEFAULT_CAPACITY: usize = 100;

pub struct InvalidCache {
    hashes: LruCache<Hash, ()>,
}

impl Default for InvalidCache {
    fn default() -> Self {
        InvalidCache {
            hashes: LruCache::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap()),
        }
    }
}

impl InvalidCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-malleated errors mark the hash; a malleated error (the wire copy
    /// may simply be corrupt) does not, since a resend under the same hash
    /// could still be valid.
    pub fn mark(&mut self, hash: Hash) {
        self.hashes.put(hash, ());
    }

    pub fn contains(&mut self, hash: &Hash) -> bool {
        self.hashes.contains(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_hash_is_reported_invalid() {
        let mut cache = InvalidCache::new();
        let h = Hash::from_bytes([9u8; 32]);
        assert!(!cache.contains(&h));
        cache.mark(h);
        assert!(cache.contains(&h));
    }
}
