//! Orphan pool: blocks received before their parent, held until the parent
//! arrives or they age out.

use std::collections::HashMap;
use std::time::Instant;

use chaincore_consensus::types::Block;
use chaincore_primitives::Hash;

const ORPHAN_EXPIRY_SECS: u64 = 60 * 60;

struct Orphan {
    block: Block,
    peer_id: Option<String>,
    received_at: Instant,
}

#[derive(Default)]
pub struct OrphanPool {
    by_hash: HashMap<Hash, Orphan>,
    /// Reverse index: parent hash -> orphan hash waiting on it. A later
    /// orphan with the same `prev` replaces the earlier one, matching the
    /// "forked orphans" rule — only one candidate per parent is kept.
    by_prev: HashMap<Hash, Hash>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn insert(&mut self, block: Block, peer_id: Option<String>) {
        let hash = block.block_hash();
        let prev = block.header.prev_hash;
        if let Some(old) = self.by_prev.insert(prev, hash) {
            if old != hash {
                self.by_hash.remove(&old);
            }
        }
        self.by_hash.insert(
            hash,
            Orphan { block, peer_id, received_at: Instant::now() },
        );
    }

    /// Orphans directly waiting on `parent`, removed from the pool.
    pub fn take_children(&mut self, parent: &Hash) -> Vec<(Block, Option<String>)> {
        match self.by_prev.remove(parent) {
            Some(hash) => match self.by_hash.remove(&hash) {
                Some(orphan) => vec![(orphan.block, orphan.peer_id)],
                None => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Drops entries older than one hour, then trims down to `max_orphans`
    /// by removing the oldest remaining entries.
    pub fn evict(&mut self, max_orphans: usize) {
        let now = Instant::now();
        let expired: Vec<Hash> = self
            .by_hash
            .iter()
            .filter(|(_, o)| now.duration_since(o.received_at).as_secs() >= ORPHAN_EXPIRY_SECS)
            .map(|(h, _)| *h)
            .collect();
        for hash in expired {
            self.remove(&hash);
        }

        while self.by_hash.len() > max_orphans {
            let oldest = self
                .by_hash
                .iter()
                .min_by_key(|(_, o)| o.received_at)
                .map(|(h, _)| *h);
            match oldest {
                Some(hash) => self.remove(&hash),
                None => break,
            }
        }
    }

    fn remove(&mut self, hash: &Hash) {
        if let Some(orphan) = self.by_hash.remove(hash) {
            let prev = orphan.block.header.prev_hash;
            if self.by_prev.get(&prev) == Some(hash) {
                self.by_prev.remove(&prev);
            }
        }
    }

    /// Purged en masse on checkpoint mismatch or `reset`.
    pub fn clear(&mut self) {
        self.by_hash.clear();
        self.by_prev.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaincore_consensus::types::BlockHeader;

    fn block(prev: Hash, nonce: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: prev,
                merkle_root: Hash::ZERO,
                timestamp: 0,
                bits: 0x207fffff,
                nonce,
            },
            txs: Vec::new(),
        }
    }

    #[test]
    fn later_orphan_replaces_earlier_for_same_parent() {
        let mut pool = OrphanPool::new();
        let parent = Hash::from_bytes([1u8; 32]);
        let first = block(parent, 1);
        let first_hash = first.block_hash();
        pool.insert(first, None);
        let second = block(parent, 2);
        let second_hash = second.block_hash();
        pool.insert(second, None);

        assert!(!pool.contains(&first_hash));
        assert!(pool.contains(&second_hash));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn take_children_removes_them_from_pool() {
        let mut pool = OrphanPool::new();
        let parent = Hash::from_bytes([2u8; 32]);
        let child = block(parent, 7);
        let child_hash = child.block_hash();
        pool.insert(child, Some("peer-a".into()));

        let children = pool.take_children(&parent);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0.block_hash(), child_hash);
        assert!(pool.is_empty());
    }
}
