//! Subscriber-facing notifications, delivered over a broadcast channel so
//! any number of listeners (wallets, indexers, RPC servers) can observe the
//! chain without the chain taking a dependency on them.

use std::sync::Arc;

use chaincore_consensus::types::Block;
use chaincore_consensus::ChainEntry;
use chaincore_primitives::Hash;

#[derive(Clone, Debug)]
pub enum ChainEvent {
    Tip(ChainEntry),
    Connect(ChainEntry, Arc<Block>),
    Reconnect(ChainEntry, Arc<Block>),
    Disconnect(ChainEntry, Arc<Block>),
    Reorganize { old_tip: ChainEntry, new_tip: ChainEntry },
    Competitor(Arc<Block>, ChainEntry),
    Orphan(Arc<Block>),
    Resolved(Arc<Block>, ChainEntry),
    BadOrphan(String, Option<String>),
    Checkpoint(Hash, u32),
    Full,
}

/// Host-implemented hook, driven from the same emission points as the
/// [`ChainEvent`] broadcast channel. A host that only needs a handful of
/// lifecycle callbacks can implement this instead of draining a channel;
/// both paths observe identical events, in the same order.
pub trait ChainListener: Send + Sync {
    fn on_event(&self, event: &ChainEvent) {
        let _ = event;
    }
}
