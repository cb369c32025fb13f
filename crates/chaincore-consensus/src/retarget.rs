//! Difficulty retargeting: the next-block `bits` value given the previous
//! tip and its ancestors.

use chaincore_primitives::{compact_to_target, target_to_compact};
use num_bigint::BigUint;

use crate::chainentry::{ChainEntry, EntrySource};
use crate::params::NetworkParams;

/// Target `bits` for a block with timestamp `new_block_time` extending
/// `prev`. Outside a retarget boundary this simply reuses `prev.bits`,
/// except on networks that permit a minimum-difficulty fallback after a
/// long silence (testnet).
pub fn get_next_work_required<S: EntrySource>(
    prev: &ChainEntry,
    new_block_time: u32,
    params: &NetworkParams,
    src: &S,
) -> u32 {
    let next_height = prev.height + 1;
    if next_height % params.retarget_interval != 0 {
        if let Some(min_diff_after) = params.allow_min_difficulty_after_secs {
            if (new_block_time as u64) > prev.timestamp as u64 + min_diff_after {
                return params.pow_limit_bits;
            }
            return walk_back_to_last_nonmin_bits(prev, params, src);
        }
        return prev.bits;
    }

    retarget(prev, params, src)
}

/// Testnet-only: walk back through difficulty-carrying ancestors to the
/// most recent block whose bits differ from the proof-of-work limit, or a
/// retarget boundary, whichever comes first.
fn walk_back_to_last_nonmin_bits<S: EntrySource>(
    prev: &ChainEntry,
    params: &NetworkParams,
    src: &S,
) -> u32 {
    let mut cur = prev.clone();
    while cur.height != 0
        && cur.height % params.retarget_interval != 0
        && cur.bits == params.pow_limit_bits
    {
        match src.entry_by_hash(&cur.prev_hash) {
            Some(p) => cur = p,
            None => break,
        }
    }
    cur.bits
}

fn retarget<S: EntrySource>(prev: &ChainEntry, params: &NetworkParams, src: &S) -> u32 {
    let window = params.retarget_interval;
    let first_height = prev.height.saturating_sub(window - 1);
    let first = prev
        .get_ancestor(first_height, src)
        .expect("retarget window ancestor must exist once past the first window");

    let actual_timespan = if prev.timestamp > first.timestamp {
        (prev.timestamp - first.timestamp) as u64
    } else {
        1
    };
    let clamped = actual_timespan.clamp(params.min_timespan(), params.max_timespan());

    let old_target = compact_to_target(prev.bits);
    let pow_limit = compact_to_target(params.pow_limit_bits);

    let mut new_target = (&old_target * BigUint::from(clamped)) / BigUint::from(params.target_timespan_secs);
    if new_target > pow_limit {
        new_target = pow_limit;
    }
    target_to_compact(&new_target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockHeader;
    use chaincore_primitives::Hash;
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

    fn build(n: u32, spacing: u32, bits: u32) -> FakeSource {
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
                timestamp: h * spacing,
                bits,
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

    fn test_params(interval: u32) -> NetworkParams {
        let mut p = NetworkParams::regtest();
        p.retarget_interval = interval;
        p.target_spacing_secs = 600;
        p.target_timespan_secs = (interval as u64) * 600;
        p
    }

    #[test]
    fn non_boundary_reuses_prev_bits() {
        let params = test_params(10);
        let src = build(5, 600, 0x1d00ffff);
        let prev = src.entry_by_hash(&src.tip).unwrap();
        let bits = get_next_work_required(&prev, prev.timestamp + 600, &params, &src);
        assert_eq!(bits, 0x1d00ffff);
    }

    #[test]
    fn fast_blocks_tighten_difficulty() {
        let params = test_params(10);
        // 10 blocks spaced at half the target interval -> timespan clamps
        // to target/4, tightening (lowering) the target.
        let src = build(10, 300, 0x1d00ffff);
        let prev = src.entry_by_hash(&src.tip).unwrap();
        let bits = get_next_work_required(&prev, prev.timestamp + 300, &params, &src);
        let new_target = compact_to_target(bits);
        let old_target = compact_to_target(0x1d00ffff);
        assert!(new_target < old_target);
    }
}
