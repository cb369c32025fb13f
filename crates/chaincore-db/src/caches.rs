//! LRU caches mirroring the batch semantics of the backing store: `start`
//! snapshots the cache, `commit` folds staged writes in, `drop` discards
//! them. This keeps a cache read during an aborted batch indistinguishable
//! from one that never saw the batch's writes.

use std::collections::HashMap;
use std::hash::Hash as StdHash;
use std::num::NonZeroUsize;

use chaincore_consensus::ChainEntry;
use chaincore_primitives::Hash;
use lru::LruCache;

/// Staged mutation to a cache entry; `Removed` distinguishes an explicit
/// eviction from "never cached" so a batch drop doesn't resurrect stale
/// data from the committed cache.
#[derive(Clone)]
enum Staged<V> {
    Put(V),
    Removed,
}

struct BatchedCache<K, V> {
    committed: LruCache<K, V>,
    staged: HashMap<K, Staged<V>>,
    active: bool,
}

impl<K: StdHash + Eq + Clone, V: Clone> BatchedCache<K, V> {
    fn new(capacity: NonZeroUsize) -> Self {
        BatchedCache {
            committed: LruCache::new(capacity),
            staged: HashMap::new(),
            active: false,
        }
    }

    fn start(&mut self) {
        self.active = true;
        self.staged.clear();
    }

    fn commit(&mut self) {
        for (k, v) in self.staged.drain() {
            match v {
                Staged::Put(v) => {
                    self.committed.put(k, v);
                }
                Staged::Removed => {
                    self.committed.pop(&k);
                }
            }
        }
        self.active = false;
    }

    fn drop_batch(&mut self) {
        self.staged.clear();
        self.active = false;
    }

    fn get(&mut self, k: &K) -> Option<V> {
        if self.active {
            if let Some(staged) = self.staged.get(k) {
                return match staged {
                    Staged::Put(v) => Some(v.clone()),
                    Staged::Removed => None,
                };
            }
        }
        self.committed.get(k).cloned()
    }

    fn put(&mut self, k: K, v: V) {
        if self.active {
            self.staged.insert(k, Staged::Put(v));
        } else {
            self.committed.put(k, v);
        }
    }

    fn remove(&mut self, k: &K) {
        if self.active {
            self.staged.insert(k.clone(), Staged::Removed);
        } else {
            self.committed.pop(k);
        }
    }

    fn clear(&mut self) {
        self.committed.clear();
        self.staged.clear();
    }
}

const DEFAULT_CAPACITY: usize = 1;

pub struct EntryCaches {
    by_hash: BatchedCache<Hash, ChainEntry>,
    /// Main-chain-only height index; invalidated on every disconnect for
    /// the affected height since it is not meaningful off the main chain.
    by_height: BatchedCache<u32, Hash>,
    coins_bytes: BatchedCache<Hash, Vec<u8>>,
}

impl EntryCaches {
    pub fn new(entry_capacity: usize, coin_capacity_bytes: usize) -> Self {
        let entry_cap = NonZeroUsize::new(entry_capacity.max(DEFAULT_CAPACITY)).unwrap();
        // coin_capacity_bytes of 0 means the coin cache is off; keep a
        // capacity-1 cache so the API stays uniform and simply goes unused.
        let coin_entries = (coin_capacity_bytes / 256).max(1);
        let coin_cap = NonZeroUsize::new(coin_entries).unwrap();
        EntryCaches {
            by_hash: BatchedCache::new(entry_cap),
            by_height: BatchedCache::new(entry_cap),
            coins_bytes: BatchedCache::new(coin_cap),
        }
    }

    pub fn start_batch(&mut self) {
        self.by_hash.start();
        self.by_height.start();
        self.coins_bytes.start();
    }

    pub fn commit_batch(&mut self) {
        self.by_hash.commit();
        self.by_height.commit();
        self.coins_bytes.commit();
    }

    pub fn drop_batch(&mut self) {
        self.by_hash.drop_batch();
        self.by_height.drop_batch();
        self.coins_bytes.drop_batch();
    }

    pub fn get_entry(&mut self, hash: &Hash) -> Option<ChainEntry> {
        self.by_hash.get(hash)
    }

    pub fn put_entry(&mut self, entry: ChainEntry) {
        self.by_hash.put(entry.hash, entry.clone());
    }

    pub fn get_height(&mut self, height: u32) -> Option<Hash> {
        self.by_height.get(&height)
    }

    pub fn put_height(&mut self, height: u32, hash: Hash) {
        self.by_height.put(height, hash);
    }

    pub fn invalidate_height(&mut self, height: u32) {
        self.by_height.remove(&height);
    }

    pub fn get_coins(&mut self, txid: &Hash) -> Option<Vec<u8>> {
        self.coins_bytes.get(txid)
    }

    pub fn put_coins(&mut self, txid: Hash, bytes: Vec<u8>) {
        self.coins_bytes.put(txid, bytes);
    }

    pub fn remove_coins(&mut self, txid: &Hash) {
        self.coins_bytes.remove(txid);
    }

    pub fn clear_all(&mut self) {
        self.by_hash.clear();
        self.by_height.clear();
        self.coins_bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaincore_consensus::BlockHeader;
    use num_bigint::BigUint;
    use num_traits::Zero;

    fn entry(height: u32) -> ChainEntry {
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash::ZERO,
            merkle_root: Hash::ZERO,
            timestamp: height,
            bits: 0x207fffff,
            nonce: height,
        };
        ChainEntry::from_header(&header, height, &BigUint::zero())
    }

    #[test]
    fn batch_drop_discards_staged_writes() {
        let mut caches = EntryCaches::new(10, 0);
        let e = entry(1);
        caches.start_batch();
        caches.put_entry(e.clone());
        assert!(caches.get_entry(&e.hash).is_some());
        caches.drop_batch();
        assert!(caches.get_entry(&e.hash).is_none());
    }

    #[test]
    fn batch_commit_persists_staged_writes() {
        let mut caches = EntryCaches::new(10, 0);
        let e = entry(1);
        caches.start_batch();
        caches.put_entry(e.clone());
        caches.commit_batch();
        assert!(caches.get_entry(&e.hash).is_some());
    }
}
