//! The chain state machine: accepts blocks, runs contextual and input
//! verification, manages orphans and reorganization, and persists the
//! result through [`chaincore_db::ChainDb`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chaincore_consensus::bip9::{compute_state, ThresholdState};
use chaincore_consensus::coins::CoinView;
use chaincore_consensus::constants::{
    MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT, MAX_FUTURE_BLOCK_TIME_SECS, MIN_VERSION_AT_BIP34,
    MIN_VERSION_AT_BIP65, MIN_VERSION_AT_BIP66,
};
use chaincore_consensus::retarget::get_next_work_required;
use chaincore_consensus::types::{Block, Tx};
use chaincore_consensus::{ChainEntry, EntrySource, NetworkParams, VerifyError, VerifyResult};
use chaincore_crypto::{ScriptFlags, Verifier, VerifyTxJob};
use chaincore_db::chaindb::DbStateCache;
use chaincore_db::ChainDb;
use chaincore_primitives::Hash;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::bloom::BloomFilter;
use crate::config::ChainConfig;
use crate::events::{ChainEvent, ChainListener};
use crate::invalid::InvalidCache;
use crate::orphan::OrphanPool;

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct ChainInner {
    orphans: OrphanPool,
    invalid: InvalidCache,
}

pub struct Chain<V: Verifier + 'static> {
    db: ChainDb,
    params: NetworkParams,
    config: ChainConfig,
    verifier: Arc<V>,
    events_tx: broadcast::Sender<ChainEvent>,
    listeners: std::sync::RwLock<Vec<Arc<dyn ChainListener>>>,
    lock: Mutex<ChainInner>,
}

fn now_unix() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl<V: Verifier + 'static> Chain<V> {
    pub fn new(db: ChainDb, params: NetworkParams, config: ChainConfig, verifier: Arc<V>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Chain {
            db,
            params,
            config,
            verifier,
            events_tx,
            listeners: std::sync::RwLock::new(Vec::new()),
            lock: Mutex::new(ChainInner {
                orphans: OrphanPool::new(),
                invalid: InvalidCache::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events_tx.subscribe()
    }

    /// Registers a host-implemented hook. Called synchronously, in
    /// registration order, from the same emission points that feed the
    /// broadcast channel.
    pub fn add_listener(&self, listener: Arc<dyn ChainListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn db(&self) -> &ChainDb {
        &self.db
    }

    fn emit(&self, event: ChainEvent) {
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_event(&event);
        }
        let _ = self.events_tx.send(event);
    }

    /// Accepts a block: returns the entry it connected to (main or
    /// alternate chain), or `None` if it was buffered as an orphan.
    pub async fn add(
        &self,
        block: Block,
        flags: ScriptFlags,
        peer_id: Option<String>,
        check_pow: bool,
    ) -> VerifyResult<Option<ChainEntry>> {
        let mut inner = self.lock.lock().await;
        let hash = block.block_hash();

        if let Some(existing) = self.db.entry_by_hash(&hash) {
            return Ok(Some(existing));
        }
        if inner.orphans.contains(&hash) {
            return Ok(None);
        }
        if inner.invalid.contains(&hash) {
            return Err(VerifyError::duplicate(true));
        }
        if inner.invalid.contains(&block.header.prev_hash) {
            inner.invalid.mark(hash);
            self.emit(ChainEvent::BadOrphan(
                "descendant of known-invalid block".into(),
                peer_id,
            ));
            return Err(VerifyError::invalid("descendant of known-invalid block"));
        }

        if check_pow && !meets_target(&hash, block.header.bits) {
            return Err(VerifyError::invalid_scored("proof-of-work does not meet target", 100));
        }

        let parent = self.db.entry_by_hash(&block.header.prev_hash);
        let Some(parent) = parent else {
            inner.orphans.insert(block.clone(), peer_id);
            inner.orphans.evict(self.config.max_orphans);
            self.emit(ChainEvent::Orphan(Arc::new(block)));
            return Ok(None);
        };

        let entry = self.connect(&mut inner, parent, block.clone(), flags).await;
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.marks_invalid() {
                    inner.invalid.mark(hash);
                }
                return Err(err);
            }
        };

        self.handle_orphans(&mut inner, entry.hash, flags).await;
        Ok(Some(entry))
    }

    /// Cascades acceptance into orphans whose parent just connected.
    /// Failures mark the orphan's source peer but do not stop the cascade
    /// for siblings queued under other parents.
    fn handle_orphans<'a>(
        &'a self,
        inner: &'a mut ChainInner,
        parent: Hash,
        flags: ScriptFlags,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + 'a>> {
        Box::pin(async move {
            let children = inner.orphans.take_children(&parent);
            for (child, peer_id) in children {
                let child_hash = child.block_hash();
                let Some(parent_entry) = self.db.entry_by_hash(&child.header.prev_hash) else {
                    continue;
                };
                match self.connect(inner, parent_entry, child.clone(), flags).await {
                    Ok(entry) => {
                        self.emit(ChainEvent::Resolved(Arc::new(child), entry));
                        self.handle_orphans(inner, child_hash, flags).await;
                    }
                    Err(err) => {
                        if err.marks_invalid() {
                            inner.invalid.mark(child_hash);
                        }
                        self.emit(ChainEvent::BadOrphan("orphan failed validation".into(), peer_id));
                    }
                }
            }
        })
    }

    async fn connect(
        &self,
        inner: &mut ChainInner,
        parent: ChainEntry,
        block: Block,
        flags: ScriptFlags,
    ) -> VerifyResult<ChainEntry> {
        let entry = ChainEntry::from_header(&block.header, parent.height + 1, &parent.chainwork);
        let tip = self.db.tip_entry().map_err(|e| VerifyError::Io(e.to_string()))?;

        if entry.chainwork <= tip.chainwork {
            self.db
                .save_alternate(&entry, &block)
                .map_err(|e| VerifyError::Io(e.to_string()))?;
            self.emit(ChainEvent::Competitor(Arc::new(block), entry.clone()));
            return Ok(entry);
        }

        if entry.prev_hash != tip.hash {
            // Stage the new tip candidate so `reorganize`'s reconnect walk
            // (which fetches every block on the winning branch, including
            // this one, from the store) can find it.
            self.db
                .save_alternate(&entry, &block)
                .map_err(|e| VerifyError::Io(e.to_string()))?;
            self.reorganize(inner, &entry, flags).await?;
            info!(height = entry.height, hash = %entry.hash, "connected block via reorganization");
            self.emit(ChainEvent::Tip(entry.clone()));
            return Ok(entry);
        }

        let state = self.verify_context(&parent, &entry, &block)?;
        let (view, state_delta) = self.verify_inputs(&entry, &block, state.flags).await?;

        self.db
            .connect_block(&entry, &block, view, state_delta)
            .map_err(|e| VerifyError::Io(e.to_string()))?;

        info!(height = entry.height, hash = %entry.hash, "connected block");
        self.emit(ChainEvent::Connect(entry.clone(), Arc::new(block.clone())));
        self.emit(ChainEvent::Tip(entry.clone()));
        Ok(entry)
    }

    /// Header-, deployment- and finality-level checks that don't require a
    /// CoinView. Returns the deployment-derived script flag set the input
    /// verification pass should use.
    fn verify_context(
        &self,
        parent: &ChainEntry,
        entry: &ChainEntry,
        block: &Block,
    ) -> VerifyResult<ContextState> {
        if entry.prev_hash != parent.hash {
            return Err(VerifyError::invalid("prevHash does not match parent"));
        }

        if self.config.checkpoints {
            if let Some(checkpoint) = self.params.checkpoint_at(entry.height) {
                if checkpoint.hash != entry.hash {
                    return Err(VerifyError::Checkpoint { height: entry.height });
                }
            }
        }

        let expected_bits = get_next_work_required(parent, entry.timestamp, &self.params, &self.db);
        if entry.bits != expected_bits {
            return Err(VerifyError::invalid("bits do not match expected difficulty"));
        }

        let mtp = parent.median_time_past(&self.db);
        if entry.timestamp <= mtp {
            return Err(VerifyError::invalid("timestamp not greater than median time past"));
        }
        if entry.timestamp as u64 > now_unix() as u64 + MAX_FUTURE_BLOCK_TIME_SECS {
            return Err(VerifyError::invalid("timestamp too far in the future"));
        }

        if entry.height >= self.params.bip34_height && entry.version < MIN_VERSION_AT_BIP34 {
            return Err(VerifyError::obsolete("version below BIP34 minimum"));
        }
        if entry.height >= self.params.bip66_height && entry.version < MIN_VERSION_AT_BIP66 {
            return Err(VerifyError::obsolete("version below BIP66 minimum"));
        }
        if entry.height >= self.params.bip65_height && entry.version < MIN_VERSION_AT_BIP65 {
            return Err(VerifyError::obsolete("version below BIP65 minimum"));
        }
        if entry.height >= self.params.bip34_height {
            verify_bip34_coinbase_height(block, entry.height)?;
        }

        let mut state_cache = DbStateCache::new(self.db.store());
        let mut flags = ScriptFlags::MANDATORY | ScriptFlags::P2SH;
        let mut witness_active = false;
        for dep in &self.params.deployments {
            let state = compute_state(parent, dep, &self.db, &mut state_cache);
            if matches!(state, ThresholdState::Active) {
                match dep.bit {
                    0 => flags = flags | ScriptFlags::CSV | ScriptFlags::DERSIG | ScriptFlags::CLTV,
                    1 => {
                        flags = flags | ScriptFlags::WITNESS | ScriptFlags::NULLDUMMY;
                        witness_active = true;
                    }
                    _ => {}
                }
            }
        }
        self.db
            .flush_state_cache(&state_cache.into_pending())
            .map_err(|e| VerifyError::Io(e.to_string()))?;

        let lock_time_cutoff = mtp;
        for tx in &block.txs {
            if !is_final(tx, entry.height, lock_time_cutoff) {
                return Err(VerifyError::invalid("transaction not final"));
            }
        }

        if witness_active && block.weight() > MAX_BLOCK_WEIGHT {
            return Err(VerifyError::invalid("block weight exceeds maximum"));
        }

        Ok(ContextState { flags })
    }

    /// Builds a fresh CoinView from stored coins, spends every non-coinbase
    /// input, accumulates fees and sigops, and fans script verification out
    /// to the external verifier.
    async fn verify_inputs(
        &self,
        entry: &ChainEntry,
        block: &Block,
        flags: ScriptFlags,
    ) -> VerifyResult<(CoinView, (i64, i64, i64))> {
        let mut view = self
            .db
            .load_view_for_block(block)
            .map_err(|e| VerifyError::Io(e.to_string()))?;

        let mut total_fees: i64 = 0;
        let mut sigops: u64 = 0;
        let mut jobs: Vec<(Vec<u8>, u32, u64, Vec<u8>)> = Vec::new();

        for tx in &block.txs {
            if tx.is_coinbase() {
                view.apply_tx(tx, entry.height);
                continue;
            }
            let mut input_value: u64 = 0;
            for (idx, input) in tx.inputs.iter().enumerate() {
                let prevout = view.spend(&input.prevout).ok_or_else(|| {
                    VerifyError::invalid("bad-txns-inputs-missingorspent")
                })?;
                input_value = input_value
                    .checked_add(prevout.value)
                    .ok_or_else(|| VerifyError::invalid("input value overflow"))?;
                jobs.push((
                    encode_tx_for_verify(tx),
                    idx as u32,
                    prevout.value,
                    prevout.script_pubkey,
                ));
            }
            let output_value: u64 = tx.outputs.iter().map(|o| o.value).sum();
            if output_value > input_value {
                return Err(VerifyError::invalid("bad-txns-in-belowout"));
            }
            total_fees += (input_value - output_value) as i64;
            sigops += tx.legacy_sigop_count();
            view.apply_tx(tx, entry.height);
        }

        if sigops > MAX_BLOCK_SIGOPS_COST {
            return Err(VerifyError::invalid("sigop cost exceeds maximum"));
        }

        let mut set = tokio::task::JoinSet::new();
        for (tx_bytes, input_index, prevout_value, prevout_script) in jobs {
            let verifier = Arc::clone(&self.verifier);
            set.spawn(async move {
                verifier
                    .verify_tx(VerifyTxJob {
                        tx_bytes: &tx_bytes,
                        input_index,
                        prevout_value,
                        prevout_script: &prevout_script,
                        flags,
                    })
                    .await
            });
        }
        while let Some(res) = set.join_next().await {
            let ok = res.map_err(|e| VerifyError::Io(e.to_string()))?;
            match ok {
                Ok(true) => {}
                Ok(false) => return Err(VerifyError::invalid_scored("script verification failed", 100)),
                Err(e) => return Err(VerifyError::invalid_scored(format!("verifier error: {e}"), 100)),
            }
        }

        let reward = self.params.reward_at(entry.height);
        let coinbase_value: u64 = block
            .txs
            .first()
            .map(|cb| cb.outputs.iter().map(|o| o.value).sum())
            .unwrap_or(0);
        let max_fees = total_fees.max(0) as u64;
        if coinbase_value > reward.saturating_add(max_fees) {
            return Err(VerifyError::invalid("coinbase pays more than fees plus reward"));
        }

        let tx_delta = block.txs.len() as i64;
        let coin_delta = block.txs.iter().map(|t| t.outputs.len() as i64).sum::<i64>()
            - block.txs.iter().filter(|t| !t.is_coinbase()).map(|t| t.inputs.len() as i64).sum::<i64>();
        let value_delta = coinbase_value as i64;
        Ok((view, (tx_delta, coin_delta, value_delta)))
    }

    /// Disconnects from the current tip down to the fork point, then
    /// reconnects the competing branch, running full contextual and input
    /// verification on every reconnected block since it was never validated
    /// while sitting on the alternate chain. On failure, the disconnected
    /// blocks are replayed back onto the chain so it ends unchanged; this is
    /// a best-effort compensating rollback rather than a single cross-block
    /// atomic transaction.
    async fn reorganize(
        &self,
        _inner: &mut ChainInner,
        competitor: &ChainEntry,
        flags: ScriptFlags,
    ) -> VerifyResult<()> {
        let tip = self.db.tip_entry().map_err(|e| VerifyError::Io(e.to_string()))?;
        let (fork, disconnect_path, connect_path) = self.find_fork(&tip, competitor)?;

        let mut disconnected_blocks = Vec::new();
        let mut cursor = tip.clone();
        for hash in &disconnect_path {
            let block = self
                .db
                .get_block(hash)
                .map_err(|e| VerifyError::Io(e.to_string()))?
                .ok_or_else(|| VerifyError::Corruption(format!("missing block {hash}")))?;
            self.db
                .disconnect_block(hash)
                .map_err(|e| VerifyError::Io(e.to_string()))?;
            self.emit(ChainEvent::Disconnect(cursor.clone(), Arc::new(block.clone())));
            disconnected_blocks.push((cursor.clone(), block));
            if let Some(parent) = self.db.entry_by_hash(&cursor.prev_hash) {
                cursor = parent;
            }
        }

        for ancestor in &connect_path {
            let block = match self.db.get_block(&ancestor.hash) {
                Ok(Some(b)) => b,
                _ => {
                    self.rollback_reorg(disconnected_blocks);
                    return Err(VerifyError::Corruption(format!(
                        "missing stored block for reorg target {}",
                        ancestor.hash
                    )));
                }
            };
            let parent = match self.db.entry_by_hash(&ancestor.prev_hash) {
                Some(p) => p,
                None => {
                    self.rollback_reorg(disconnected_blocks);
                    return Err(VerifyError::Corruption("missing parent during reorg".into()));
                }
            };
            match self.verify_context(&parent, ancestor, &block) {
                Ok(state) => match self.verify_inputs(ancestor, &block, state.flags).await {
                    Ok((view, delta)) => {
                        if let Err(e) = self.db.connect_block(ancestor, &block, view, delta) {
                            self.rollback_reorg(disconnected_blocks);
                            return Err(VerifyError::Io(e.to_string()));
                        }
                        self.emit(ChainEvent::Reconnect(ancestor.clone(), Arc::new(block)));
                    }
                    Err(e) => {
                        self.rollback_reorg(disconnected_blocks);
                        return Err(e);
                    }
                },
                Err(e) => {
                    self.rollback_reorg(disconnected_blocks);
                    return Err(e);
                }
            }
        }

        info!(fork_height = fork.height, "reorganized chain");
        self.emit(ChainEvent::Reorganize { old_tip: tip, new_tip: competitor.clone() });
        Ok(())
    }

    /// Best-effort compensation when a reorg fails partway: replays the
    /// blocks this reorg disconnected back onto the chain without
    /// re-validating them (they were valid and on the main chain moments
    /// ago).
    fn rollback_reorg(&self, disconnected: Vec<(ChainEntry, Block)>) {
        for (entry, block) in disconnected.into_iter().rev() {
            if let Err(e) = self.reconnect_without_verification(&entry, &block) {
                warn!(error = %e, hash = %entry.hash, "failed to restore block during reorg rollback");
            }
        }
    }

    /// Rebuilds the coin view for a block already known to be valid and
    /// reconnects it, skipping contextual and script verification. Used
    /// only to restore blocks this process itself disconnected moments
    /// earlier, when a reorganization fails partway through reconnecting
    /// the winning branch.
    fn reconnect_without_verification(&self, entry: &ChainEntry, block: &Block) -> VerifyResult<()> {
        let mut view = self
            .db
            .load_view_for_block(block)
            .map_err(|e| VerifyError::Io(e.to_string()))?;
        for tx in &block.txs {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    view.spend(&input.prevout);
                }
            }
            view.apply_tx(tx, entry.height);
        }
        let tx_delta = block.txs.len() as i64;
        let coin_delta = block.txs.iter().map(|t| t.outputs.len() as i64).sum::<i64>()
            - block.txs.iter().filter(|t| !t.is_coinbase()).map(|t| t.inputs.len() as i64).sum::<i64>();
        let coinbase_value: i64 = block
            .txs
            .first()
            .map(|cb| cb.outputs.iter().map(|o| o.value).sum::<u64>() as i64)
            .unwrap_or(0);
        self.db
            .connect_block(entry, block, view, (tx_delta, coin_delta, coinbase_value))
            .map_err(|e| VerifyError::Io(e.to_string()))?;
        Ok(())
    }

    fn find_fork(
        &self,
        tip: &ChainEntry,
        competitor: &ChainEntry,
    ) -> VerifyResult<(ChainEntry, Vec<Hash>, Vec<ChainEntry>)> {
        let mut a = tip.clone();
        let mut b = competitor.clone();
        let mut connect_path = Vec::new();

        while b.height > a.height {
            connect_path.push(b.clone());
            b = self
                .db
                .entry_by_hash(&b.prev_hash)
                .ok_or_else(|| VerifyError::Corruption("missing ancestor during fork search".into()))?;
        }
        let mut disconnect_path = Vec::new();
        while a.height > b.height {
            disconnect_path.push(a.hash);
            a = self
                .db
                .entry_by_hash(&a.prev_hash)
                .ok_or_else(|| VerifyError::Corruption("missing ancestor during fork search".into()))?;
        }
        while a.hash != b.hash {
            disconnect_path.push(a.hash);
            connect_path.push(b.clone());
            a = self
                .db
                .entry_by_hash(&a.prev_hash)
                .ok_or_else(|| VerifyError::Corruption("missing ancestor during fork search".into()))?;
            b = self
                .db
                .entry_by_hash(&b.prev_hash)
                .ok_or_else(|| VerifyError::Corruption("missing ancestor during fork search".into()))?;
        }
        connect_path.reverse();
        Ok((a, disconnect_path, connect_path))
    }

    /// Resets the chain to `target_height`, purging orphans.
    pub async fn reset(&self, target_height: u32) -> VerifyResult<()> {
        let mut inner = self.lock.lock().await;
        inner.orphans.clear();
        self.db
            .reset_to(target_height)
            .map_err(|e| VerifyError::Io(e.to_string()))?;
        Ok(())
    }

    pub async fn invalidate(&self, hash: Hash) {
        let mut inner = self.lock.lock().await;
        inner.invalid.mark(hash);
    }

    /// Block locator: tip, then exponentially-spaced ancestors back to
    /// genesis, for compact peer-to-peer chain comparison.
    pub fn get_locator(&self, start: Option<Hash>) -> VerifyResult<Vec<Hash>> {
        let mut entry = match start {
            Some(h) => self
                .db
                .entry_by_hash(&h)
                .ok_or_else(|| VerifyError::invalid("unknown locator start hash"))?,
            None => self.db.tip_entry().map_err(|e| VerifyError::Io(e.to_string()))?,
        };
        let mut locator = Vec::new();
        let mut step = 1u32;
        loop {
            locator.push(entry.hash);
            if entry.height == 0 {
                break;
            }
            let target = entry.height.saturating_sub(step);
            entry = entry
                .get_ancestor(target, &self.db)
                .ok_or_else(|| VerifyError::Corruption("locator ancestor missing".into()))?;
            if locator.len() >= 10 {
                step = step.saturating_mul(2);
            }
        }
        Ok(locator)
    }

    /// Streams `(entry, matching-txs)` main-chain-forward from `start_height`.
    /// `filter` is consulted (and grown) for every tx in visiting order, so
    /// an output that matches seeds the filter before its own block's later
    /// transactions are tested — a spend of that output in the same or a
    /// later block is caught without a second pass.
    pub fn scan<F: FnMut(&ChainEntry, &[Tx]) -> VerifyResult<()>>(
        &self,
        start_height: u32,
        filter: &mut BloomFilter,
        mut f: F,
    ) -> VerifyResult<()> {
        self.db
            .scan_from(start_height, |entry, block| {
                let mut matched = Vec::new();
                for tx in &block.txs {
                    let txid = tx.txid();
                    let mut hit = filter.contains(txid.as_bytes());
                    if !hit {
                        for input in &tx.inputs {
                            if filter.contains(input.prevout.txid.as_bytes()) {
                                hit = true;
                                break;
                            }
                        }
                    }
                    if !hit {
                        for output in &tx.outputs {
                            if filter.contains(&output.script_pubkey) {
                                hit = true;
                                break;
                            }
                        }
                    }
                    if hit {
                        filter.insert(txid.as_bytes());
                        matched.push(tx.clone());
                    }
                }
                if !matched.is_empty() {
                    f(entry, &matched)
                        .map_err(|e| chaincore_db::ChainDbError::Corruption(e.to_string()))?;
                }
                Ok(())
            })
            .map_err(|e| VerifyError::Io(e.to_string()))
    }

    /// Re-feeds a batch of already-known blocks through the normal
    /// add-block pipeline in order, e.g. to catch up a chain loaded from an
    /// external source. Each block is validated exactly as `add` would.
    pub async fn replay(
        &self,
        blocks: Vec<Block>,
        flags: ScriptFlags,
        check_pow: bool,
    ) -> VerifyResult<Vec<ChainEntry>> {
        let mut connected = Vec::with_capacity(blocks.len());
        for block in blocks {
            if let Some(entry) = self.add(block, flags, None, check_pow).await? {
                connected.push(entry);
            }
        }
        Ok(connected)
    }

    /// Runs the retroactive sweep that deletes block bodies and undo data
    /// outside the configured retention window. Distinct from the
    /// automatic per-connect pruning: this is for an operator-triggered
    /// sweep after `pruneAfter`/`keepBlocks` is tightened.
    pub async fn prune(&self) -> VerifyResult<()> {
        let _inner = self.lock.lock().await;
        self.db
            .retroactive_prune_sweep()
            .map_err(|e| VerifyError::Io(e.to_string()))
    }

    /// Runs full contextual and input verification for `block` against the
    /// current tip without persisting anything. Used to validate a
    /// candidate block (e.g. one just mined locally) before broadcasting.
    pub async fn verify_block(&self, block: &Block) -> VerifyResult<()> {
        let _inner = self.lock.lock().await;
        let parent = self
            .db
            .entry_by_hash(&block.header.prev_hash)
            .ok_or_else(|| VerifyError::invalid("verify_block: unknown parent"))?;
        let entry = ChainEntry::from_header(&block.header, parent.height + 1, &parent.chainwork);
        let state = self.verify_context(&parent, &entry, block)?;
        self.verify_inputs(&entry, block, state.flags).await?;
        Ok(())
    }

    /// Builds the CoinView a transaction would consume if connected right
    /// now, without spending anything persistently. Lets a caller inspect
    /// input values (e.g. to compute a fee) for a tx that hasn't been
    /// mined yet.
    pub fn get_spent_view(&self, tx: &Tx) -> VerifyResult<CoinView> {
        let mut view = CoinView::new();
        if tx.is_coinbase() {
            return Ok(view);
        }
        for input in &tx.inputs {
            if view.get(&input.prevout.txid).is_none() {
                let coins = self
                    .db
                    .get_coins(&input.prevout.txid)
                    .map_err(|e| VerifyError::Io(e.to_string()))?
                    .ok_or_else(|| VerifyError::invalid("bad-txns-inputs-missingorspent"))?;
                view.insert(input.prevout.txid, coins);
            }
            view.spend(&input.prevout)
                .ok_or_else(|| VerifyError::invalid("bad-txns-inputs-missingorspent"))?;
        }
        Ok(view)
    }
}

struct ContextState {
    flags: ScriptFlags,
}

fn meets_target(hash: &Hash, bits: u32) -> bool {
    let target = chaincore_primitives::compact_to_target(bits);
    let value = num_bigint::BigUint::from_bytes_le(hash.as_bytes());
    value <= target
}

fn is_final(tx: &Tx, height: u32, lock_time_cutoff: u32) -> bool {
    if tx.locktime == 0 {
        return true;
    }
    if tx.inputs.iter().all(|i| i.sequence == u32::MAX) {
        return true;
    }
    let horizon = if tx.locktime < 500_000_000 { height } else { lock_time_cutoff };
    (tx.locktime as u64) < horizon as u64
}

/// The coinbase's first scriptSig push must decode (as a minimally-encoded
/// little-endian integer) to the block's own height.
fn verify_bip34_coinbase_height(block: &Block, height: u32) -> VerifyResult<()> {
    let coinbase = block
        .txs
        .first()
        .ok_or_else(|| VerifyError::invalid("block has no coinbase"))?;
    let script = &coinbase.inputs.first().ok_or_else(|| VerifyError::invalid("coinbase has no input"))?.script_sig;
    let Some(&push_len) = script.first() else {
        return Err(VerifyError::invalid("coinbase scriptSig is empty"));
    };
    let push_len = push_len as usize;
    if script.len() < 1 + push_len || push_len > 4 {
        return Err(VerifyError::invalid("malformed BIP34 height push"));
    }
    let mut buf = [0u8; 4];
    buf[..push_len].copy_from_slice(&script[1..1 + push_len]);
    let decoded = u32::from_le_bytes(buf);
    if decoded != height {
        return Err(VerifyError::invalid("coinbase height mismatch"));
    }
    Ok(())
}

fn encode_tx_for_verify(tx: &Tx) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&tx.version.to_le_bytes());
    out.extend(chaincore_primitives::compact_size_encode(tx.inputs.len() as u64));
    for input in &tx.inputs {
        out.extend_from_slice(input.prevout.txid.as_bytes());
        out.extend_from_slice(&input.prevout.vout.to_le_bytes());
        out.extend(chaincore_primitives::compact_size_encode(input.script_sig.len() as u64));
        out.extend_from_slice(&input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }
    out.extend(chaincore_primitives::compact_size_encode(tx.outputs.len() as u64));
    for output in &tx.outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        out.extend(chaincore_primitives::compact_size_encode(output.script_pubkey.len() as u64));
        out.extend_from_slice(&output.script_pubkey);
    }
    out.extend_from_slice(&tx.locktime.to_le_bytes());
    out
}
