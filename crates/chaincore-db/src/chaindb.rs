//! High-level durable chain store: startup protocol, atomic connect/
//! disconnect, pruning, and the read paths the chain state machine and
//! BIP9 state-cache computation need.

use std::cell::RefCell;
use std::path::Path;

use chaincore_consensus::bip9::{StateCache, ThresholdState};
use chaincore_consensus::coins::{CoinView, Coins, UndoCoins};
use chaincore_consensus::types::Block;
use chaincore_consensus::{ChainEntry, EntrySource};
use chaincore_primitives::Hash;
use tracing::{info, warn};

use crate::blockcodec::{decode_block, encode_block};
use crate::caches::EntryCaches;
use crate::config::ChainDbConfig;
use crate::error::{ChainDbError, ChainDbResult};
use crate::keys::{
    addr_outpoint_key, addr_tx_key, bit_hash_key, decode_chain_flags, decode_chain_state,
    decode_coins, decode_deployment_table, decode_undo, encode_chain_flags, encode_chain_state,
    encode_coins, encode_deployment_table, encode_tx_meta, encode_undo, ChainFlags, ChainState,
    DeploymentRecord, TxMeta, CHAIN_MAGIC,
};
use crate::store::Store;

pub struct ConnectOutcome {
    pub state: ChainState,
}

pub struct ChainDb {
    store: Store,
    caches: RefCell<EntryCaches>,
    config: ChainDbConfig,
    tip: RefCell<Hash>,
}

impl ChainDb {
    pub fn open(path: &Path, config: ChainDbConfig) -> ChainDbResult<Self> {
        let store = Store::open(path)?;
        let caches = EntryCaches::new(config.entry_cache, config.coin_cache_bytes);

        let db = ChainDb {
            store,
            caches: RefCell::new(caches),
            config,
            tip: RefCell::new(Hash::ZERO),
        };

        match db.store.get_chain_state()? {
            None => db.init_genesis()?,
            Some(bytes) => {
                let state = decode_chain_state(&bytes)?;
                *db.tip.borrow_mut() = state.tip_hash;
                db.enforce_flag_upgrade_policy()?;
                db.reconcile_deployment_cache()?;
                if db.config.prune && db.config.force_prune {
                    db.retroactive_prune_sweep()?;
                }
            }
        }
        Ok(db)
    }

    fn init_genesis(&self) -> ChainDbResult<()> {
        info!("initializing chain database at genesis");
        let header = chaincore_consensus::types::BlockHeader::from_wire_bytes(
            &self.config.network.genesis_header_bytes,
        );
        let entry = ChainEntry::genesis(&header);
        let genesis_block = Block { header: header.clone(), txs: Vec::new() };

        let batch = self.store.begin_write()?;
        batch.put_entry(entry.hash.as_bytes(), &entry.serialize())?;
        batch.put_height_by_hash(entry.hash.as_bytes(), 0)?;
        batch.put_hash_by_height(0, entry.hash.as_bytes())?;
        batch.put_tip(entry.hash.as_bytes())?;
        if !self.config.spv {
            batch.put_block(entry.hash.as_bytes(), &encode_block(&genesis_block))?;
        }
        let flags = ChainFlags {
            magic: CHAIN_MAGIC,
            spv: self.config.spv,
            witness: self.config.force_witness,
            prune: self.config.prune,
            index_tx: self.config.index_tx,
            index_address: self.config.index_address,
        };
        batch.put_chain_flags(&encode_chain_flags(&flags))?;
        batch.put_deployments(&encode_deployment_table(&self.deployment_records()))?;
        let state = ChainState {
            tip_hash: entry.hash,
            tx_count: 0,
            coin_count: 0,
            total_value: 0,
        };
        batch.put_chain_state(&encode_chain_state(&state))?;
        batch.commit()?;

        self.caches.borrow_mut().put_entry(entry.clone());
        self.caches.borrow_mut().put_height(0, entry.hash);
        *self.tip.borrow_mut() = entry.hash;
        Ok(())
    }

    fn deployment_records(&self) -> Vec<DeploymentRecord> {
        self.config
            .network
            .deployments
            .iter()
            .map(|d| DeploymentRecord {
                bit: d.bit,
                start_time: d.start_time as u32,
                timeout: d.timeout as u32,
            })
            .collect()
    }

    /// `spv`, `prune`, `indexTx`, `indexAddress` cannot change without a
    /// matching `force*` opt-in; `witness` may always be retroactively
    /// enabled.
    fn enforce_flag_upgrade_policy(&self) -> ChainDbResult<()> {
        let Some(bytes) = self.store.get_chain_flags()? else {
            return Err(ChainDbError::Corruption("chain flags missing".into()));
        };
        let on_disk = decode_chain_flags(&bytes)?;

        if on_disk.spv != self.config.spv {
            return Err(ChainDbError::FlagUpgrade("spv cannot change after creation".into()));
        }
        if on_disk.index_tx != self.config.index_tx {
            return Err(ChainDbError::FlagUpgrade("indexTx cannot change after creation".into()));
        }
        if on_disk.index_address != self.config.index_address {
            return Err(ChainDbError::FlagUpgrade(
                "indexAddress cannot change after creation".into(),
            ));
        }
        if on_disk.prune != self.config.prune && !self.config.force_prune {
            return Err(ChainDbError::FlagUpgrade(
                "prune cannot change without forcePrune".into(),
            ));
        }

        let new_flags = ChainFlags {
            magic: on_disk.magic,
            spv: on_disk.spv,
            witness: on_disk.witness || self.config.force_witness,
            prune: self.config.prune,
            index_tx: on_disk.index_tx,
            index_address: on_disk.index_address,
        };
        if new_flags != on_disk {
            let batch = self.store.begin_write()?;
            batch.put_chain_flags(&encode_chain_flags(&new_flags))?;
            batch.commit()?;
        }
        Ok(())
    }

    /// If any deployment parameter differs from what's on disk, discard the
    /// cached activation results for the changed bits and rewrite the
    /// deployment table.
    fn reconcile_deployment_cache(&self) -> ChainDbResult<()> {
        let configured = self.deployment_records();
        let on_disk = match self.store.get_deployments()? {
            Some(bytes) => decode_deployment_table(&bytes)?,
            None => Vec::new(),
        };

        let mut changed_bits = Vec::new();
        for dep in &configured {
            let matches_disk = on_disk.iter().any(|d| d == dep);
            if !matches_disk {
                changed_bits.push(dep.bit);
            }
        }
        for dep in &on_disk {
            if !configured.iter().any(|d| d.bit == dep.bit) {
                changed_bits.push(dep.bit);
            }
        }

        if changed_bits.is_empty() {
            return Ok(());
        }
        warn!(?changed_bits, "deployment parameters changed, invalidating state cache");

        let batch = self.store.begin_write()?;
        for bit in &changed_bits {
            for key in self.store.state_cache_keys_for_bit(*bit)? {
                batch.delete_state_cache(&key)?;
            }
        }
        batch.put_deployments(&encode_deployment_table(&configured))?;
        batch.commit()?;
        Ok(())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Commits a batch of BIP9 state-cache results on their own, outside
    /// the block-connect transaction: deployment state is computed before
    /// the block's CoinView is known, so bundling the two would require the
    /// caller to pre-open a batch before validation even starts.
    pub fn flush_state_cache(&self, entries: &[(u8, Hash, ThresholdState)]) -> ChainDbResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let batch = self.store.begin_write()?;
        for (bit, hash, state) in entries {
            batch.put_state_cache(&bit_hash_key(*bit, hash), state.to_byte())?;
        }
        batch.commit()
    }

    pub fn tip_entry(&self) -> ChainDbResult<ChainEntry> {
        let hash = *self.tip.borrow();
        self.entry_by_hash(&hash)
            .ok_or_else(|| ChainDbError::Corruption("tip entry missing".into()))
    }

    pub fn chain_state(&self) -> ChainDbResult<ChainState> {
        let bytes = self
            .store
            .get_chain_state()?
            .ok_or_else(|| ChainDbError::Corruption("chain state missing".into()))?;
        decode_chain_state(&bytes)
    }

    pub fn get_block(&self, hash: &Hash) -> ChainDbResult<Option<Block>> {
        match self.store.get_block(hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_coins(&self, txid: &Hash) -> ChainDbResult<Option<Coins>> {
        if let Some(bytes) = self.caches.borrow_mut().get_coins(txid) {
            return Ok(Some(decode_coins(&bytes)?));
        }
        match self.store.get_coins(txid.as_bytes())? {
            Some(bytes) => {
                let coins = decode_coins(&bytes)?;
                self.caches.borrow_mut().put_coins(*txid, bytes);
                Ok(Some(coins))
            }
            None => Ok(None),
        }
    }

    /// Loads a [`CoinView`] populated with the Coins records for every
    /// input of `block`'s non-coinbase transactions, ready for contextual
    /// and input verification.
    pub fn load_view_for_block(&self, block: &Block) -> ChainDbResult<CoinView> {
        let mut view = CoinView::new();
        for tx in &block.txs {
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                if view.get(&input.prevout.txid).is_none() {
                    if let Some(coins) = self.get_coins(&input.prevout.txid)? {
                        view.insert(input.prevout.txid, coins);
                    }
                }
            }
        }
        Ok(view)
    }

    /// Persists a freshly validated block as the new tip: writes the entry,
    /// height/forward indices, the resulting coin view, and undo data, then
    /// commits the new ChainState. Everything happens in one atomic batch.
    pub fn connect_block(
        &self,
        entry: &ChainEntry,
        block: &Block,
        mut view: CoinView,
        state_delta: (i64, i64, i64),
    ) -> ChainDbResult<ConnectOutcome> {
        let prev_state = self.chain_state()?;
        let batch = self.store.begin_write()?;
        self.caches.borrow_mut().start_batch();

        batch.put_entry(entry.hash.as_bytes(), &entry.serialize())?;
        batch.put_height_by_hash(entry.hash.as_bytes(), entry.height)?;
        self.caches.borrow_mut().put_entry(entry.clone());

        batch.delete_tip(entry.prev_hash.as_bytes())?;
        batch.put_tip(entry.hash.as_bytes())?;
        batch.put_hash_by_height(entry.height, entry.hash.as_bytes())?;
        batch.put_next_hash(entry.prev_hash.as_bytes(), entry.hash.as_bytes())?;
        self.caches.borrow_mut().put_height(entry.height, entry.hash);

        if !self.config.spv {
            batch.put_block(entry.hash.as_bytes(), &encode_block(block))?;
        }

        // Touched = every txid an input in this block references, plus every
        // txid this block itself creates. `view` already reflects spends and
        // this block's own outputs (the caller ran `apply_tx`/`spend` while
        // building it); re-deriving fresh `Coins` here would silently
        // un-spend outputs a later transaction in the same block consumed.
        let touched_txids: Vec<Hash> = {
            let mut seen = std::collections::HashSet::new();
            for tx in &block.txs {
                for input in &tx.inputs {
                    seen.insert(input.prevout.txid);
                }
                seen.insert(tx.txid());
            }
            seen.into_iter().collect()
        };
        for txid in &touched_txids {
            match view.get(txid) {
                Some(coins) if !coins.is_fully_spent() => {
                    let bytes = encode_coins(coins);
                    batch.put_coins(txid.as_bytes(), &bytes)?;
                    self.caches.borrow_mut().put_coins(*txid, bytes);
                }
                _ => {
                    batch.delete_coins(txid.as_bytes())?;
                    self.caches.borrow_mut().remove_coins(txid);
                }
            }
        }

        if !view.undo.entries.is_empty() {
            batch.put_undo(entry.hash.as_bytes(), &encode_undo(&view.undo))?;
        }

        if self.config.index_tx || self.config.index_address {
            let mut undo_iter = view.undo.entries.iter();
            for (tx_index, tx) in block.txs.iter().enumerate() {
                let txid = tx.txid();
                if self.config.index_tx {
                    let meta = TxMeta { block_hash: entry.hash, height: entry.height, index: tx_index as u32 };
                    batch.put_tx_meta(txid.as_bytes(), &encode_tx_meta(&meta))?;
                }
                if self.config.index_address {
                    if !tx.is_coinbase() {
                        for input in &tx.inputs {
                            let Some(undo_entry) = undo_iter.next() else { continue };
                            if undo_entry.script_pubkey.is_empty() {
                                continue;
                            }
                            let addr_hash = chaincore_crypto::hash160(&undo_entry.script_pubkey);
                            batch.put_addr_tx(&addr_tx_key(&addr_hash, &txid))?;
                            batch.delete_addr_outpoint(&addr_outpoint_key(
                                &addr_hash,
                                &input.prevout.txid,
                                input.prevout.vout,
                            ))?;
                        }
                    }
                    for (vout, output) in tx.outputs.iter().enumerate() {
                        if output.script_pubkey.is_empty() {
                            continue;
                        }
                        let addr_hash = chaincore_crypto::hash160(&output.script_pubkey);
                        batch.put_addr_tx(&addr_tx_key(&addr_hash, &txid))?;
                        let still_unspent = view
                            .get(&txid)
                            .and_then(|coins| coins.get(vout as u32))
                            .is_some();
                        let key = addr_outpoint_key(&addr_hash, &txid, vout as u32);
                        if still_unspent {
                            batch.put_addr_outpoint(&key)?;
                        } else {
                            batch.delete_addr_outpoint(&key)?;
                        }
                    }
                }
            }
        }

        if self.config.prune && self.config.prune_after > 0 {
            let keep = self.config.keep_blocks;
            if entry.height > self.config.prune_after + keep {
                let prune_height = entry.height - keep;
                if prune_height > self.config.prune_after {
                    if let Some(old_hash) = self.store.get_hash_by_height(prune_height)? {
                        batch.delete_block(&old_hash)?;
                        batch.delete_undo(&old_hash)?;
                    }
                }
            }
        }

        let (tx_delta, coin_delta, value_delta) = state_delta;
        let new_state = ChainState {
            tip_hash: entry.hash,
            tx_count: (prev_state.tx_count as i64 + tx_delta).max(0) as u64,
            coin_count: (prev_state.coin_count as i64 + coin_delta).max(0) as u64,
            total_value: (prev_state.total_value as i64 + value_delta).max(0) as u64,
        };
        batch.put_chain_state(&encode_chain_state(&new_state))?;

        batch.commit()?;
        self.caches.borrow_mut().commit_batch();
        *self.tip.borrow_mut() = entry.hash;
        Ok(ConnectOutcome { state: new_state })
    }

    /// Persists an off-main-chain block: its entry and height-by-hash index
    /// and body, without touching any main-chain-only pointer
    /// (hash-by-height, tip, next-hash). Used when a competing block does
    /// not (yet) extend the most-work chain, or to stage a new tip
    /// candidate before a reorganization reconnects it.
    pub fn save_alternate(&self, entry: &ChainEntry, block: &Block) -> ChainDbResult<()> {
        let batch = self.store.begin_write()?;
        batch.put_entry(entry.hash.as_bytes(), &entry.serialize())?;
        batch.put_height_by_hash(entry.hash.as_bytes(), entry.height)?;
        if !self.config.spv {
            batch.put_block(entry.hash.as_bytes(), &encode_block(block))?;
        }
        batch.commit()?;
        self.caches.borrow_mut().put_entry(entry.clone());
        Ok(())
    }

    /// Mirror of `connect_block`: reads the undo log, rebuilds spent
    /// outputs, deletes outputs the block created, and commits ChainState
    /// pointing at the parent.
    pub fn disconnect_block(&self, hash: &Hash) -> ChainDbResult<ChainEntry> {
        let entry = self
            .entry_by_hash(hash)
            .ok_or_else(|| ChainDbError::NotFound(format!("entry {hash}")))?;
        let block = self
            .get_block(hash)?
            .ok_or_else(|| ChainDbError::NotFound(format!("block {hash}")))?;
        let undo_bytes = self.store.get_undo(hash.as_bytes())?;
        let undo: UndoCoins = match undo_bytes {
            Some(bytes) => decode_undo(&bytes)?,
            None => UndoCoins::default(),
        };

        let prev_state = self.chain_state()?;
        let batch = self.store.begin_write()?;
        self.caches.borrow_mut().start_batch();

        for tx in &block.txs {
            let txid = tx.txid();
            batch.delete_coins(txid.as_bytes())?;
            self.caches.borrow_mut().remove_coins(&txid);

            if self.config.index_tx {
                batch.delete_tx_meta(txid.as_bytes())?;
            }
            if self.config.index_address {
                for (vout, output) in tx.outputs.iter().enumerate() {
                    if output.script_pubkey.is_empty() {
                        continue;
                    }
                    let addr_hash = chaincore_crypto::hash160(&output.script_pubkey);
                    batch.delete_addr_tx(&addr_tx_key(&addr_hash, &txid))?;
                    batch.delete_addr_outpoint(&addr_outpoint_key(&addr_hash, &txid, vout as u32))?;
                }
            }
        }

        let mut undo_iter = undo.entries.iter().rev();
        for tx in block.txs.iter().rev() {
            if tx.is_coinbase() {
                continue;
            }
            let txid = tx.txid();
            for input in tx.inputs.iter().rev() {
                if let Some(undo_entry) = undo_iter.next() {
                    if self.config.index_address && !undo_entry.script_pubkey.is_empty() {
                        let addr_hash = chaincore_crypto::hash160(&undo_entry.script_pubkey);
                        batch.delete_addr_tx(&addr_tx_key(&addr_hash, &txid))?;
                        batch.put_addr_outpoint(&addr_outpoint_key(
                            &addr_hash,
                            &input.prevout.txid,
                            input.prevout.vout,
                        ))?;
                    }
                    let coins = match self.get_coins(&input.prevout.txid)? {
                        Some(mut existing) => {
                            let idx = input.prevout.vout as usize;
                            if existing.outputs.len() <= idx {
                                existing.outputs.resize(idx + 1, None);
                            }
                            existing.outputs[idx] = Some(chaincore_consensus::types::TxOut {
                                value: undo_entry.value,
                                script_pubkey: undo_entry.script_pubkey.clone(),
                            });
                            existing
                        }
                        None => {
                            let mut outputs = vec![None; input.prevout.vout as usize + 1];
                            outputs[input.prevout.vout as usize] =
                                Some(chaincore_consensus::types::TxOut {
                                    value: undo_entry.value,
                                    script_pubkey: undo_entry.script_pubkey.clone(),
                                });
                            Coins {
                                version: tx.version,
                                coinbase: undo_entry.coinbase,
                                height: undo_entry.height,
                                outputs,
                            }
                        }
                    };
                    let bytes = encode_coins(&coins);
                    batch.put_coins(input.prevout.txid.as_bytes(), &bytes)?;
                    self.caches.borrow_mut().put_coins(input.prevout.txid, bytes);
                }
            }
        }

        batch.delete_undo(hash.as_bytes())?;
        batch.delete_hash_by_height(entry.height)?;
        self.caches.borrow_mut().invalidate_height(entry.height);
        batch.delete_next_hash(entry.prev_hash.as_bytes())?;
        batch.delete_tip(hash.as_bytes())?;
        batch.put_tip(entry.prev_hash.as_bytes())?;

        // Reverse of connect_block's forward state_delta: coins created by
        // this block minus inputs it spent, and the coinbase value it
        // minted, both computed straight from the block rather than
        // threaded through as a parameter (disconnect has no separate
        // caller-supplied delta).
        let coin_delta: i64 = block.txs.iter().map(|t| t.outputs.len() as i64).sum::<i64>()
            - block
                .txs
                .iter()
                .filter(|t| !t.is_coinbase())
                .map(|t| t.inputs.len() as i64)
                .sum::<i64>();
        let coinbase_value: i64 = block
            .txs
            .first()
            .map(|cb| cb.outputs.iter().map(|o| o.value).sum::<u64>() as i64)
            .unwrap_or(0);

        let new_state = ChainState {
            tip_hash: entry.prev_hash,
            tx_count: prev_state.tx_count.saturating_sub(block.txs.len() as u64),
            coin_count: (prev_state.coin_count as i64 - coin_delta).max(0) as u64,
            total_value: (prev_state.total_value as i64 - coinbase_value).max(0) as u64,
        };
        batch.put_chain_state(&encode_chain_state(&new_state))?;

        batch.commit()?;
        self.caches.borrow_mut().commit_batch();
        *self.tip.borrow_mut() = entry.prev_hash;
        Ok(entry)
    }

    /// Walks backward from the current tip, deleting per-block records and
    /// committing a new ChainState at every step, so a crash mid-reset
    /// leaves the chain well-formed at some intermediate height.
    pub fn reset_to(&self, target_height: u32) -> ChainDbResult<()> {
        loop {
            let tip = self.tip_entry()?;
            if tip.height <= target_height {
                break;
            }
            self.disconnect_block(&tip.hash)?;
        }
        Ok(())
    }

    /// Streams `(entry, block)` pairs main-chain-forward from `start_height`.
    pub fn scan_from<F: FnMut(&ChainEntry, &Block) -> ChainDbResult<()>>(
        &self,
        start_height: u32,
        mut f: F,
    ) -> ChainDbResult<()> {
        for (height, hash_bytes) in self.store.scan_main_chain_from(start_height)? {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&hash_bytes);
            let hash = Hash::from_bytes(hash);
            let entry = self
                .entry_by_hash(&hash)
                .ok_or_else(|| ChainDbError::Corruption(format!("missing entry at height {height}")))?;
            if let Some(block) = self.get_block(&hash)? {
                f(&entry, &block)?;
            }
        }
        Ok(())
    }

    /// One-shot sweep, run at startup when `prune=true, forcePrune=true`
    /// against a previously non-pruned chain, or on demand via
    /// `Chain::prune`: deletes `b`/`u` records for every height in
    /// `[pruneAfter+1, tipHeight-keepBlocks]`.
    pub fn retroactive_prune_sweep(&self) -> ChainDbResult<()> {
        let tip = self.tip_entry()?;
        if tip.height <= self.config.keep_blocks {
            return Ok(());
        }
        let sweep_end = tip.height - self.config.keep_blocks;
        if sweep_end <= self.config.prune_after {
            return Ok(());
        }
        info!(from = self.config.prune_after + 1, to = sweep_end, "retroactive prune sweep");
        let batch = self.store.begin_write()?;
        for height in (self.config.prune_after + 1)..=sweep_end {
            if let Some(hash) = self.store.get_hash_by_height(height)? {
                batch.delete_block(&hash)?;
                batch.delete_undo(&hash)?;
            }
        }
        batch.commit()?;
        Ok(())
    }
}

impl EntrySource for ChainDb {
    fn entry_by_hash(&self, hash: &Hash) -> Option<ChainEntry> {
        if let Some(e) = self.caches.borrow_mut().get_entry(hash) {
            return Some(e);
        }
        let bytes = self.store.get_entry(hash.as_bytes()).ok()??;
        if bytes.len() != chaincore_consensus::constants::CHAIN_ENTRY_BYTES {
            return None;
        }
        let mut arr = [0u8; chaincore_consensus::constants::CHAIN_ENTRY_BYTES];
        arr.copy_from_slice(&bytes);
        let entry = ChainEntry::deserialize(&arr);
        self.caches.borrow_mut().put_entry(entry.clone());
        Some(entry)
    }

    fn hash_at_height(&self, height: u32) -> Option<Hash> {
        if let Some(h) = self.caches.borrow_mut().get_height(height) {
            return Some(h);
        }
        let bytes = self.store.get_hash_by_height(height).ok()??;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        let hash = Hash::from_bytes(arr);
        self.caches.borrow_mut().put_height(height, hash);
        Some(hash)
    }

    fn has_next(&self, hash: &Hash) -> bool {
        self.store.get_next_hash(hash.as_bytes()).ok().flatten().is_some()
    }

    fn tip_hash(&self) -> Hash {
        *self.tip.borrow()
    }
}

/// Read-through/write-through BIP9 StateCache backed by the `v` table.
/// Reads check the persisted table directly (the cache is small and
/// per-bit lookups are rare compared to header lookups); writes stage into
/// an open batch supplied by the caller.
pub struct DbStateCache<'a> {
    store: &'a Store,
    pending: Vec<(u8, Hash, ThresholdState)>,
}

impl<'a> DbStateCache<'a> {
    pub fn new(store: &'a Store) -> Self {
        DbStateCache { store, pending: Vec::new() }
    }

    pub fn flush(self, batch: &crate::store::WriteBatch<'_>) -> ChainDbResult<()> {
        for (bit, hash, state) in self.pending {
            batch.put_state_cache(&bit_hash_key(bit, &hash), state.to_byte())?;
        }
        Ok(())
    }

    pub fn into_pending(self) -> Vec<(u8, Hash, ThresholdState)> {
        self.pending
    }
}

impl<'a> StateCache for DbStateCache<'a> {
    fn get_cached(&self, bit: u8, window_end_hash: &Hash) -> Option<ThresholdState> {
        if let Some((_, _, s)) = self
            .pending
            .iter()
            .rev()
            .find(|(b, h, _)| *b == bit && h == window_end_hash)
        {
            return Some(*s);
        }
        let key = bit_hash_key(bit, window_end_hash);
        let byte = self.store.get_state_cache(&key).ok().flatten()?;
        ThresholdState::from_byte(byte)
    }

    fn put_cached(&mut self, bit: u8, window_end_hash: Hash, state: ThresholdState) {
        self.pending.push((bit, window_end_hash, state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaincore_consensus::types::{BlockHeader, OutPoint, Tx, TxIn, TxOut};
    use chaincore_consensus::NetworkParams;

    fn params() -> NetworkParams {
        let mut p = NetworkParams::regtest();
        p.genesis_header_bytes = BlockHeader {
            version: 1,
            prev_hash: Hash::ZERO,
            merkle_root: Hash::ZERO,
            timestamp: 1_600_000_000,
            bits: 0x207f_ffff,
            nonce: 0,
        }
        .to_wire_bytes();
        p
    }

    fn open(dir: &tempfile::TempDir) -> ChainDb {
        ChainDb::open(&dir.path().join("chain.redb"), ChainDbConfig::new(params())).expect("open chain db")
    }

    fn coinbase(height: u32, value: u64) -> Tx {
        Tx {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint { txid: Hash::ZERO, vout: u32::MAX },
                script_sig: vec![4, height as u8, 0, 0, 0],
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![TxOut { value, script_pubkey: vec![0x51] }],
            locktime: 0,
        }
    }

    fn block(prev: Hash, height: u32, timestamp: u32, txs: Vec<Tx>) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: prev,
                merkle_root: Hash::ZERO,
                timestamp,
                bits: 0x207f_ffff,
                nonce: height,
            },
            txs,
        }
    }

    /// Mirrors the sequential apply order `Chain::verify_inputs` uses:
    /// spend every non-coinbase input, then stage the tx's own outputs,
    /// before moving to the next transaction.
    fn build_view(db: &ChainDb, blk: &Block) -> CoinView {
        let mut view = db.load_view_for_block(blk).expect("load view");
        for tx in &blk.txs {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    view.spend(&input.prevout);
                }
            }
            view.apply_tx(tx, 0);
        }
        view
    }

    fn state_delta(blk: &Block) -> (i64, i64, i64) {
        let tx_delta = blk.txs.len() as i64;
        let coin_delta = blk.txs.iter().map(|t| t.outputs.len() as i64).sum::<i64>()
            - blk.txs.iter().filter(|t| !t.is_coinbase()).map(|t| t.inputs.len() as i64).sum::<i64>();
        let value_delta = blk.txs[0].outputs.iter().map(|o| o.value).sum::<u64>() as i64;
        (tx_delta, coin_delta, value_delta)
    }

    #[test]
    fn genesis_open_initializes_zero_height_tip() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let tip = db.tip_entry().unwrap();
        assert_eq!(tip.height, 0);
        assert_eq!(tip.hash, db.tip_hash());
    }

    #[test]
    fn connect_then_disconnect_restores_prior_tip() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let genesis = db.tip_entry().unwrap();

        let cb = coinbase(1, 50_0000_0000);
        let blk = block(genesis.hash, 1, genesis.timestamp + 600, vec![cb]);
        let entry = ChainEntry::from_header(&blk.header, 1, &genesis.chainwork);
        let view = build_view(&db, &blk);
        db.connect_block(&entry, &blk, view, state_delta(&blk)).unwrap();

        assert_eq!(db.tip_entry().unwrap().hash, entry.hash);
        assert!(db.get_coins(&blk.txs[0].txid()).unwrap().is_some());

        db.disconnect_block(&entry.hash).unwrap();
        assert_eq!(db.tip_entry().unwrap().hash, genesis.hash);
    }

    /// Regression test: a transaction spending an output created earlier in
    /// the same block must not have that spend silently undone by later
    /// per-transaction bookkeeping inside `connect_block`.
    #[test]
    fn intra_block_spend_is_not_resurrected() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let genesis = db.tip_entry().unwrap();

        let cb0 = coinbase(1, 50_0000_0000);
        let block1 = block(genesis.hash, 1, genesis.timestamp + 600, vec![cb0.clone()]);
        let entry1 = ChainEntry::from_header(&block1.header, 1, &genesis.chainwork);
        let view1 = build_view(&db, &block1);
        db.connect_block(&entry1, &block1, view1, state_delta(&block1)).unwrap();

        let cb1 = coinbase(2, 50_0000_0000);
        let tx1 = Tx {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint { txid: cb0.txid(), vout: 0 },
                script_sig: Vec::new(),
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![
                TxOut { value: 30_0000_0000, script_pubkey: vec![0x51] },
                TxOut { value: 19_0000_0000, script_pubkey: vec![0x51] },
            ],
            locktime: 0,
        };
        let tx2 = Tx {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint { txid: tx1.txid(), vout: 0 },
                script_sig: Vec::new(),
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![TxOut { value: 29_0000_0000, script_pubkey: vec![0x51] }],
            locktime: 0,
        };
        let block2 = block(
            entry1.hash,
            2,
            genesis.timestamp + 1200,
            vec![cb1, tx1.clone(), tx2.clone()],
        );
        let entry2 = ChainEntry::from_header(&block2.header, 2, &entry1.chainwork);
        let view2 = build_view(&db, &block2);
        db.connect_block(&entry2, &block2, view2, state_delta(&block2)).unwrap();

        assert!(db.get_coins(&cb0.txid()).unwrap().is_none(), "fully-spent coinbase must be gone");

        let tx1_coins = db.get_coins(&tx1.txid()).unwrap().expect("tx1 coins persisted");
        assert!(tx1_coins.get(0).is_none(), "tx1's output 0 was spent within the block");
        assert!(tx1_coins.get(1).is_some(), "tx1's output 1 is still unspent");

        let tx2_coins = db.get_coins(&tx2.txid()).unwrap().expect("tx2 coins persisted");
        assert!(tx2_coins.get(0).is_some());
    }

    #[test]
    fn retroactive_prune_sweep_deletes_bodies_below_keep_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ChainDbConfig::new(params());
        config.keep_blocks = 2;
        let db = ChainDb::open(&dir.path().join("chain.redb"), config).unwrap();
        let mut tip = db.tip_entry().unwrap();

        for h in 1..=5u32 {
            let cb = coinbase(h, 50_0000_0000);
            let blk = block(tip.hash, h, tip.timestamp + 600, vec![cb]);
            let entry = ChainEntry::from_header(&blk.header, h, &tip.chainwork);
            let view = build_view(&db, &blk);
            db.connect_block(&entry, &blk, view, state_delta(&blk)).unwrap();
            tip = entry;
        }
        assert!(db.get_block(&tip.hash).unwrap().is_some());

        let mut config = ChainDbConfig::new(params());
        config.prune = true;
        config.force_prune = true;
        config.keep_blocks = 2;
        drop(db);
        let db = ChainDb::open(&dir.path().join("chain.redb"), config).unwrap();

        let pruned_hash = db.hash_at_height(1).expect("height index survives pruning");
        assert!(db.get_block(&pruned_hash).unwrap().is_none(), "old body swept");
        assert!(db.get_block(&tip.hash).unwrap().is_some(), "recent body kept");
    }

    /// Regression test: disconnect must reverse the same `coin_count`/
    /// `total_value` deltas connect applied, not just `tx_count`, or a
    /// disconnect-then-reconnect round trip double-counts.
    #[test]
    fn disconnect_reverses_coin_and_value_counters() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let genesis = db.tip_entry().unwrap();
        let genesis_state = db.chain_state().unwrap();

        let cb0 = coinbase(1, 50_0000_0000);
        let block1 = block(genesis.hash, 1, genesis.timestamp + 600, vec![cb0.clone()]);
        let entry1 = ChainEntry::from_header(&block1.header, 1, &genesis.chainwork);
        let view1 = build_view(&db, &block1);
        db.connect_block(&entry1, &block1, view1, state_delta(&block1)).unwrap();

        let cb1 = coinbase(2, 50_0000_0000);
        let spend = Tx {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint { txid: cb0.txid(), vout: 0 },
                script_sig: Vec::new(),
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![
                TxOut { value: 20_0000_0000, script_pubkey: vec![0x51] },
                TxOut { value: 29_0000_0000, script_pubkey: vec![0x51] },
            ],
            locktime: 0,
        };
        let block2 = block(entry1.hash, 2, genesis.timestamp + 1200, vec![cb1, spend]);
        let entry2 = ChainEntry::from_header(&block2.header, 2, &entry1.chainwork);
        let view2 = build_view(&db, &block2);
        db.connect_block(&entry2, &block2, view2, state_delta(&block2)).unwrap();

        let after_both_blocks = db.chain_state().unwrap();
        assert_ne!(after_both_blocks.coin_count, genesis_state.coin_count);

        db.disconnect_block(&entry2.hash).unwrap();
        let after_one_disconnect = db.chain_state().unwrap();
        let (_, coin_delta_1, value_delta_1) = state_delta(&block1);
        assert_eq!(
            after_one_disconnect.coin_count as i64,
            genesis_state.coin_count as i64 + coin_delta_1
        );
        assert_eq!(
            after_one_disconnect.total_value as i64,
            genesis_state.total_value as i64 + value_delta_1
        );

        db.disconnect_block(&entry1.hash).unwrap();
        let back_to_genesis = db.chain_state().unwrap();
        assert_eq!(back_to_genesis.coin_count, genesis_state.coin_count);
        assert_eq!(back_to_genesis.total_value, genesis_state.total_value);
        assert_eq!(back_to_genesis.tx_count, genesis_state.tx_count);
    }

    #[test]
    fn tx_index_and_address_index_populate_on_connect_and_clear_on_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ChainDbConfig::new(params());
        config.index_tx = true;
        config.index_address = true;
        let db = ChainDb::open(&dir.path().join("chain.redb"), config).unwrap();
        let genesis = db.tip_entry().unwrap();

        let cb = coinbase(1, 50_0000_0000);
        let blk = block(genesis.hash, 1, genesis.timestamp + 600, vec![cb.clone()]);
        let entry = ChainEntry::from_header(&blk.header, 1, &genesis.chainwork);
        let view = build_view(&db, &blk);
        db.connect_block(&entry, &blk, view, state_delta(&blk)).unwrap();

        let txid = cb.txid();
        assert!(db.store().get_tx_meta(txid.as_bytes()).unwrap().is_some());
        let addr_hash = chaincore_crypto::hash160(&cb.outputs[0].script_pubkey);
        assert!(db
            .store()
            .addr_tx_present(&crate::keys::addr_tx_key(&addr_hash, &txid))
            .unwrap());
        assert!(db
            .store()
            .addr_outpoint_present(&crate::keys::addr_outpoint_key(&addr_hash, &txid, 0))
            .unwrap());

        db.disconnect_block(&entry.hash).unwrap();
        assert!(db.store().get_tx_meta(txid.as_bytes()).unwrap().is_none());
        assert!(!db
            .store()
            .addr_tx_present(&crate::keys::addr_tx_key(&addr_hash, &txid))
            .unwrap());
        assert!(!db
            .store()
            .addr_outpoint_present(&crate::keys::addr_outpoint_key(&addr_hash, &txid, 0))
            .unwrap());
    }
}
