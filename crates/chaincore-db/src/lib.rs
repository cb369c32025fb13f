//! Durable storage for chain state: a redb-backed key/value layout, LRU
//! caches in front of it, and the high-level `ChainDb` API that the chain
//! state machine drives.

pub mod blockcodec;
pub mod caches;
pub mod chaindb;
pub mod config;
pub mod error;
pub mod keys;
pub mod store;

pub use chaindb::{ChainDb, ConnectOutcome, DbStateCache};
pub use config::ChainDbConfig;
pub use error::{ChainDbError, ChainDbResult};
pub use keys::{ChainFlags, ChainState, DeploymentRecord, TxMeta};
pub use store::{Store, WriteBatch};

#[cfg(test)]
mod tests {
    use super::*;
    use chaincore_consensus::NetworkParams;
    use tempfile::tempdir;

    #[test]
    fn open_bootstraps_genesis_and_is_reopenable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.redb");
        let config = ChainDbConfig::new(NetworkParams::regtest());

        let db = ChainDb::open(&path, config.clone()).unwrap();
        let state = db.chain_state().unwrap();
        assert_eq!(state.tx_count, 0);
        drop(db);

        let reopened = ChainDb::open(&path, config).unwrap();
        let state2 = reopened.chain_state().unwrap();
        assert_eq!(state.tip_hash, state2.tip_hash);
    }
}
