//! Version-bits (BIP9) soft-fork deployment state machine.
//!
//! Each deployment bit transitions across window-aligned boundaries
//! (blocks whose `height + 1` is a multiple of `period`). Results are
//! memoized per `(bit, window-end entry)` pair; computing the state for an
//! arbitrary entry walks backward by whole windows until it finds a cached
//! state, then replays forward.

use chaincore_primitives::Hash;

use crate::chainentry::{ChainEntry, EntrySource};
use crate::constants::{VERSION_BITS_TOP_BITS, VERSION_BITS_TOP_MASK};
use crate::params::DeploymentParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdState {
    Defined,
    Started,
    LockedIn,
    Active,
    Failed,
}

impl ThresholdState {
    pub fn to_byte(self) -> u8 {
        match self {
            ThresholdState::Defined => 0,
            ThresholdState::Started => 1,
            ThresholdState::LockedIn => 2,
            ThresholdState::Active => 3,
            ThresholdState::Failed => 4,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ThresholdState::Defined),
            1 => Some(ThresholdState::Started),
            2 => Some(ThresholdState::LockedIn),
            3 => Some(ThresholdState::Active),
            4 => Some(ThresholdState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ThresholdState::Active | ThresholdState::Failed)
    }
}

/// Read/write access to the persisted `v`-prefixed StateCache, keyed by
/// `(bit, window-end entry hash)`.
pub trait StateCache {
    fn get_cached(&self, bit: u8, window_end_hash: &Hash) -> Option<ThresholdState>;
    fn put_cached(&mut self, bit: u8, window_end_hash: Hash, state: ThresholdState);
}

fn window_end_ancestor<S: EntrySource>(
    entry: &ChainEntry,
    period: u32,
    src: &S,
) -> Option<ChainEntry> {
    if entry.height + 1 < period {
        return None;
    }
    let window_end_height = ((entry.height + 1) / period) * period - 1;
    entry.get_ancestor(window_end_height, src)
}

/// Computes the threshold state for the deployment as observed immediately
/// after `entry` (i.e. the state that governs the *next* block).
pub fn compute_state<S: EntrySource, C: StateCache>(
    entry: &ChainEntry,
    dep: &DeploymentParams,
    src: &S,
    cache: &mut C,
) -> ThresholdState {
    let Some(mut window_end) = window_end_ancestor(entry, dep.period, src) else {
        return ThresholdState::Defined;
    };

    // Walk backward by whole windows, collecting the chain of window-end
    // entries whose state is not yet cached. The state before the very
    // first window (window index 1, i.e. `height + 1 == period`) is always
    // Defined: there is no earlier window to inherit from.
    let mut pending = Vec::new();
    let state_before: ThresholdState = loop {
        if let Some(cached) = cache.get_cached(dep.bit, &window_end.hash) {
            break cached;
        }
        pending.push(window_end.clone());
        if window_end.height + 1 <= dep.period {
            break ThresholdState::Defined;
        }
        match window_end.get_ancestor(window_end.height - dep.period, src) {
            Some(prev_window_end) => window_end = prev_window_end,
            None => break ThresholdState::Defined,
        }
    };

    let mut state = state_before;
    for window_end in pending.into_iter().rev() {
        state = advance_one_window(&window_end, dep, src, state);
        cache.put_cached(dep.bit, window_end.hash, state);
    }
    state
}

fn advance_one_window<S: EntrySource>(
    window_end: &ChainEntry,
    dep: &DeploymentParams,
    src: &S,
    state: ThresholdState,
) -> ThresholdState {
    match state {
        ThresholdState::Defined => {
            let mtp = window_end.median_time_past(src) as u64;
            if mtp >= dep.timeout {
                ThresholdState::Failed
            } else if mtp >= dep.start_time {
                ThresholdState::Started
            } else {
                ThresholdState::Defined
            }
        }
        ThresholdState::Started => {
            let mtp = window_end.median_time_past(src) as u64;
            if mtp >= dep.timeout {
                return ThresholdState::Failed;
            }
            let count = count_signaling(window_end, dep, src);
            if count >= dep.threshold {
                ThresholdState::LockedIn
            } else {
                ThresholdState::Started
            }
        }
        ThresholdState::LockedIn => ThresholdState::Active,
        ThresholdState::Active => ThresholdState::Active,
        ThresholdState::Failed => ThresholdState::Failed,
    }
}

fn count_signaling<S: EntrySource>(window_end: &ChainEntry, dep: &DeploymentParams, src: &S) -> u32 {
    let mut count = 0u32;
    let mut cur = window_end.clone();
    for _ in 0..dep.period {
        if signals(&cur, dep.bit) {
            count += 1;
        }
        if cur.height == 0 {
            break;
        }
        match src.entry_by_hash(&cur.prev_hash) {
            Some(p) => cur = p,
            None => break,
        }
    }
    count
}

fn signals(entry: &ChainEntry, bit: u8) -> bool {
    let version = entry.version as u32;
    if version & VERSION_BITS_TOP_MASK != VERSION_BITS_TOP_BITS {
        return false;
    }
    version & (1 << bit) != 0
}

/// ORs `1<<bit` into the version-bits base for every deployment currently
/// STARTED or LOCKED_IN.
pub fn compute_block_version<S: EntrySource, C: StateCache>(
    prev: &ChainEntry,
    deployments: &[DeploymentParams],
    src: &S,
    cache: &mut C,
) -> u32 {
    let mut version = VERSION_BITS_TOP_BITS;
    for dep in deployments {
        let state = compute_state(prev, dep, src, cache);
        if matches!(state, ThresholdState::Started | ThresholdState::LockedIn) {
            version |= 1 << dep.bit;
        }
    }
    version
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockHeader;
    use num_bigint::BigUint;
    use num_traits::Zero;
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

    #[derive(Default)]
    struct MapCache(HashMap<(u8, Hash), ThresholdState>);
    impl StateCache for MapCache {
        fn get_cached(&self, bit: u8, hash: &Hash) -> Option<ThresholdState> {
            self.0.get(&(bit, *hash)).copied()
        }
        fn put_cached(&mut self, bit: u8, hash: Hash, state: ThresholdState) {
            self.0.insert((bit, hash), state);
        }
    }

    // 24 blocks signaling bit 0, period 8, threshold 6, start=0, timeout=huge.
    fn build_chain(n: u32, signal_from: u32) -> FakeSource {
        let mut by_hash = HashMap::new();
        let mut by_height = HashMap::new();
        let mut prev = Hash::ZERO;
        let mut work = BigUint::zero();
        let mut tip = Hash::ZERO;
        for h in 0..n {
            let version = if h >= signal_from {
                VERSION_BITS_TOP_BITS | 1
            } else {
                VERSION_BITS_TOP_BITS
            } as i32;
            let header = BlockHeader {
                version,
                prev_hash: prev,
                merkle_root: Hash::ZERO,
                timestamp: 1_000_000 + h * 600,
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
    fn activation_reaches_locked_in_then_active() {
        let src = build_chain(24, 0);
        let dep = DeploymentParams {
            bit: 0,
            start_time: 0,
            timeout: u64::MAX,
            period: 8,
            threshold: 6,
        };
        let mut cache = MapCache::default();

        let end_w1 = src.entry_by_hash(&src.hash_at_height(7).unwrap()).unwrap();
        let s1 = compute_state(&end_w1, &dep, &src, &mut cache);
        assert_eq!(s1, ThresholdState::Started);

        let end_w2 = src.entry_by_hash(&src.hash_at_height(15).unwrap()).unwrap();
        let s2 = compute_state(&end_w2, &dep, &src, &mut cache);
        assert_eq!(s2, ThresholdState::LockedIn);

        let end_w3 = src.entry_by_hash(&src.hash_at_height(23).unwrap()).unwrap();
        let s3 = compute_state(&end_w3, &dep, &src, &mut cache);
        assert_eq!(s3, ThresholdState::Active);
    }

    #[test]
    fn block_version_carries_started_bit() {
        let src = build_chain(16, 0);
        let dep = DeploymentParams {
            bit: 0,
            start_time: 0,
            timeout: u64::MAX,
            period: 8,
            threshold: 6,
        };
        let mut cache = MapCache::default();
        let end_w1 = src.entry_by_hash(&src.hash_at_height(7).unwrap()).unwrap();
        let version = compute_block_version(&end_w1, &[dep], &src, &mut cache);
        assert_eq!(version, 0x2000_0001);
    }
}
