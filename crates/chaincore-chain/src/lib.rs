//! The chain state machine: orphan management, contextual and input
//! verification, reorganization, and event broadcast, built on top of
//! [`chaincore_db::ChainDb`] and the consensus rules in `chaincore-consensus`.

pub mod bloom;
pub mod chain;
pub mod config;
pub mod events;
pub mod invalid;
pub mod orphan;

pub use bloom::BloomFilter;
pub use chain::Chain;
pub use config::ChainConfig;
pub use events::{ChainEvent, ChainListener};
pub use invalid::InvalidCache;
pub use orphan::OrphanPool;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chaincore_consensus::types::{Block, BlockHeader, OutPoint, Tx, TxIn, TxOut};
    use chaincore_consensus::NetworkParams;
    use chaincore_crypto::{AcceptAllVerifier, ScriptFlags};
    use chaincore_db::{ChainDb, ChainDbConfig};
    use chaincore_primitives::Hash;

    use super::*;

    fn regtest_params() -> NetworkParams {
        let mut params = NetworkParams::regtest();
        params.genesis_header_bytes = BlockHeader {
            version: 1,
            prev_hash: Hash::ZERO,
            merkle_root: Hash::ZERO,
            timestamp: 1_600_000_000,
            bits: 0x207f_ffff,
            nonce: 0,
        }
        .to_wire_bytes();
        params
    }

    fn coinbase(height: u32) -> Tx {
        Tx {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint { txid: Hash::ZERO, vout: u32::MAX },
                script_sig: vec![4, height as u8, 0, 0, 0],
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![TxOut { value: 50_0000_0000, script_pubkey: vec![0x51] }],
            locktime: 0,
        }
    }

    fn mine_child(parent: &Hash, height: u32, timestamp: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: *parent,
                merkle_root: Hash::ZERO,
                timestamp,
                bits: 0x207f_ffff,
                nonce: height,
            },
            txs: vec![coinbase(height)],
        }
    }

    async fn open_chain(dir: &tempfile::TempDir) -> Chain<AcceptAllVerifier> {
        let params = regtest_params();
        let db_config = ChainDbConfig::new(params.clone());
        let db = ChainDb::open(&dir.path().join("chain.redb"), db_config).expect("open chain db");
        Chain::new(db, params, ChainConfig::default(), Arc::new(AcceptAllVerifier))
    }

    #[tokio::test]
    async fn linear_extension_advances_tip() {
        let dir = tempfile::tempdir().unwrap();
        let chain = open_chain(&dir).await;
        let genesis = chain.db().tip_entry().unwrap();

        let b1 = mine_child(&genesis.hash, 1, genesis.timestamp + 600);
        let entry = chain
            .add(b1.clone(), ScriptFlags::NONE, None, false)
            .await
            .unwrap()
            .expect("block connects");
        assert_eq!(entry.height, 1);
        assert_eq!(chain.db().tip_entry().unwrap().hash, b1.block_hash());
    }

    #[tokio::test]
    async fn out_of_order_block_is_buffered_as_orphan() {
        let dir = tempfile::tempdir().unwrap();
        let chain = open_chain(&dir).await;
        let genesis = chain.db().tip_entry().unwrap();

        let b1 = mine_child(&genesis.hash, 1, genesis.timestamp + 600);
        let b2 = mine_child(&b1.block_hash(), 2, genesis.timestamp + 1200);

        let result = chain.add(b2.clone(), ScriptFlags::NONE, None, false).await.unwrap();
        assert!(result.is_none());
        assert_eq!(chain.db().tip_entry().unwrap().hash, genesis.hash);

        chain.add(b1.clone(), ScriptFlags::NONE, None, false).await.unwrap();
        assert_eq!(chain.db().tip_entry().unwrap().hash, b2.block_hash());
    }

    #[tokio::test]
    async fn invalid_ancestor_rejects_descendant() {
        let dir = tempfile::tempdir().unwrap();
        let chain = open_chain(&dir).await;
        let genesis = chain.db().tip_entry().unwrap();

        let bad = mine_child(&genesis.hash, 1, genesis.timestamp - 1);
        let err = chain.add(bad.clone(), ScriptFlags::NONE, None, false).await.unwrap_err();
        assert!(err.marks_invalid());

        let child = mine_child(&bad.block_hash(), 2, genesis.timestamp + 600);
        let err = chain.add(child, ScriptFlags::NONE, None, false).await.unwrap_err();
        assert!(matches!(err, chaincore_consensus::VerifyError::Invalid { .. }));
    }

    #[tokio::test]
    async fn replay_feeds_blocks_through_the_normal_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let chain = open_chain(&dir).await;
        let genesis = chain.db().tip_entry().unwrap();

        let b1 = mine_child(&genesis.hash, 1, genesis.timestamp + 600);
        let b2 = mine_child(&b1.block_hash(), 2, genesis.timestamp + 1200);

        let connected = chain
            .replay(vec![b1.clone(), b2.clone()], ScriptFlags::NONE, false)
            .await
            .unwrap();
        assert_eq!(connected.len(), 2);
        assert_eq!(chain.db().tip_entry().unwrap().hash, b2.block_hash());
    }

    #[tokio::test]
    async fn verify_block_accepts_a_valid_candidate_without_connecting_it() {
        let dir = tempfile::tempdir().unwrap();
        let chain = open_chain(&dir).await;
        let genesis = chain.db().tip_entry().unwrap();

        let b1 = mine_child(&genesis.hash, 1, genesis.timestamp + 600);
        chain.verify_block(&b1).await.unwrap();
        assert_eq!(chain.db().tip_entry().unwrap().hash, genesis.hash, "verify_block must not connect");

        chain.add(b1.clone(), ScriptFlags::NONE, None, false).await.unwrap();
        assert_eq!(chain.db().tip_entry().unwrap().hash, b1.block_hash());
    }

    #[tokio::test]
    async fn get_spent_view_resolves_inputs_without_spending_them() {
        let dir = tempfile::tempdir().unwrap();
        let chain = open_chain(&dir).await;
        let genesis = chain.db().tip_entry().unwrap();

        let b1 = mine_child(&genesis.hash, 1, genesis.timestamp + 600);
        let coinbase_txid = b1.txs[0].txid();
        chain.add(b1.clone(), ScriptFlags::NONE, None, false).await.unwrap();

        let spend = Tx {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint { txid: coinbase_txid, vout: 0 },
                script_sig: Vec::new(),
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![TxOut { value: 10_0000_0000, script_pubkey: vec![0x51] }],
            locktime: 0,
        };
        let view = chain.get_spent_view(&spend).unwrap();
        assert!(view.get(&coinbase_txid).is_none(), "single-output coin is fully spent and dropped from the view");
        assert_eq!(view.undo.entries.len(), 1);

        assert!(chain.db().get_coins(&coinbase_txid).unwrap().unwrap().get(0).is_some(), "persisted coin untouched");
    }

    #[tokio::test]
    async fn scan_reports_blocks_matching_a_caller_supplied_filter() {
        let dir = tempfile::tempdir().unwrap();
        let chain = open_chain(&dir).await;
        let genesis = chain.db().tip_entry().unwrap();

        let b1 = mine_child(&genesis.hash, 1, genesis.timestamp + 600);
        chain.add(b1.clone(), ScriptFlags::NONE, None, false).await.unwrap();

        let mut filter = crate::bloom::BloomFilter::new(256, 4, 0);
        filter.insert(&[0x51]);

        let mut visited = Vec::new();
        chain
            .scan(1, &mut filter, |entry, txs| {
                visited.push((entry.height, txs.len()));
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, vec![(1, 1)]);
    }

    #[tokio::test]
    async fn prune_runs_without_error_on_a_short_chain() {
        let dir = tempfile::tempdir().unwrap();
        let chain = open_chain(&dir).await;
        chain.prune().await.unwrap();
    }
}
