//! redb-backed table definitions, one table per key-prefix, plus the
//! atomic write-batch wrapper every mutation goes through.

use std::path::Path;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};

use crate::error::{ChainDbError, ChainDbResult};

pub const SCHEMA_VERSION: u8 = 1;

const CHAIN_STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("R_chain_state");
const CHAIN_FLAGS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("O_chain_flags");
const DEPLOYMENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("V_deployments");
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("e_entries");
const HEIGHT_BY_HASH: TableDefinition<&[u8], &[u8]> = TableDefinition::new("h_height_by_hash");
const HASH_BY_HEIGHT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("H_hash_by_height");
const NEXT_HASH: TableDefinition<&[u8], &[u8]> = TableDefinition::new("n_next_hash");
const TIP_SET: TableDefinition<&[u8], &[u8]> = TableDefinition::new("p_tip_set");
const BLOCKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("b_blocks");
const UNDO: TableDefinition<&[u8], &[u8]> = TableDefinition::new("u_undo");
const COINS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("c_coins");
const STATE_CACHE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("v_state_cache");
const TX_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("t_tx_index");
const ADDR_TX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("T_addr_tx");
const ADDR_OUTPOINT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("C_addr_outpoint");
const SCHEMA: TableDefinition<&[u8], &[u8]> = TableDefinition::new("_schema");

const ALL_TABLES: &[TableDefinition<&[u8], &[u8]>] = &[
    CHAIN_STATE,
    CHAIN_FLAGS,
    DEPLOYMENTS,
    ENTRIES,
    HEIGHT_BY_HASH,
    HASH_BY_HEIGHT,
    NEXT_HASH,
    TIP_SET,
    BLOCKS,
    UNDO,
    COINS,
    STATE_CACHE,
    TX_INDEX,
    ADDR_TX,
    ADDR_OUTPOINT,
    SCHEMA,
];

pub struct Store {
    db: Database,
}

impl Store {
    pub fn open(path: &Path) -> ChainDbResult<Self> {
        let db = Database::create(path)?;
        let tx = db.begin_write()?;
        for table in ALL_TABLES {
            tx.open_table(*table)?;
        }
        tx.commit()?;

        let store = Store { db };
        store.ensure_schema_version()?;
        Ok(store)
    }

    fn ensure_schema_version(&self) -> ChainDbResult<()> {
        let read = self.db.begin_read()?;
        let table = read.open_table(SCHEMA)?;
        let existing = table.get(b"version".as_slice())?;
        match existing {
            Some(guard) => {
                let bytes = guard.value();
                if bytes.len() != 1 || bytes[0] != SCHEMA_VERSION {
                    let on_disk = bytes.first().copied().unwrap_or(0);
                    return Err(ChainDbError::SchemaVersion {
                        on_disk,
                        expected: SCHEMA_VERSION,
                    });
                }
            }
            None => {
                drop(table);
                drop(read);
                let write = self.db.begin_write()?;
                {
                    let mut table = write.open_table(SCHEMA)?;
                    table.insert(b"version".as_slice(), [SCHEMA_VERSION].as_slice())?;
                }
                write.commit()?;
            }
        }
        Ok(())
    }

    pub fn begin_write(&self) -> ChainDbResult<WriteBatch<'_>> {
        Ok(WriteBatch::new(self.db.begin_write()?))
    }

    fn get_raw(&self, table_def: TableDefinition<&[u8], &[u8]>, key: &[u8]) -> ChainDbResult<Option<Vec<u8>>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(table_def)?;
        Ok(table.get(key)?.map(|g| g.value().to_vec()))
    }

    pub fn get_chain_state(&self) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(CHAIN_STATE, b"")
    }

    pub fn get_chain_flags(&self) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(CHAIN_FLAGS, b"")
    }

    pub fn get_deployments(&self) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(DEPLOYMENTS, b"")
    }

    pub fn get_entry(&self, hash: &[u8]) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(ENTRIES, hash)
    }

    pub fn get_height_by_hash(&self, hash: &[u8]) -> ChainDbResult<Option<u32>> {
        Ok(self
            .get_raw(HEIGHT_BY_HASH, hash)?
            .map(|b| u32::from_le_bytes(b.try_into().unwrap())))
    }

    pub fn get_hash_by_height(&self, height: u32) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(HASH_BY_HEIGHT, &height.to_be_bytes())
    }

    pub fn get_next_hash(&self, hash: &[u8]) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(NEXT_HASH, hash)
    }

    pub fn is_tip(&self, hash: &[u8]) -> ChainDbResult<bool> {
        Ok(self.get_raw(TIP_SET, hash)?.is_some())
    }

    pub fn tip_set_hashes(&self) -> ChainDbResult<Vec<Vec<u8>>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(TIP_SET)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (k, _) = row?;
            out.push(k.value().to_vec());
        }
        Ok(out)
    }

    pub fn get_block(&self, hash: &[u8]) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(BLOCKS, hash)
    }

    pub fn get_undo(&self, hash: &[u8]) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(UNDO, hash)
    }

    pub fn get_coins(&self, txid: &[u8]) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(COINS, txid)
    }

    pub fn coin_count(&self) -> ChainDbResult<u64> {
        let read = self.db.begin_read()?;
        let table = read.open_table(COINS)?;
        Ok(table.len()?)
    }

    pub fn get_state_cache(&self, key: &[u8]) -> ChainDbResult<Option<u8>> {
        Ok(self.get_raw(STATE_CACHE, key)?.and_then(|v| v.first().copied()))
    }

    pub fn state_cache_keys_for_bit(&self, bit: u8) -> ChainDbResult<Vec<Vec<u8>>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(STATE_CACHE)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (k, _) = row?;
            let key = k.value();
            if key.first() == Some(&bit) {
                out.push(key.to_vec());
            }
        }
        Ok(out)
    }

    pub fn get_tx_meta(&self, txid: &[u8]) -> ChainDbResult<Option<Vec<u8>>> {
        self.get_raw(TX_INDEX, txid)
    }

    pub fn addr_tx_present(&self, key: &[u8]) -> ChainDbResult<bool> {
        Ok(self.get_raw(ADDR_TX, key)?.is_some())
    }

    pub fn addr_outpoint_present(&self, key: &[u8]) -> ChainDbResult<bool> {
        Ok(self.get_raw(ADDR_OUTPOINT, key)?.is_some())
    }

    /// Scans blocks main-chain-forward starting at `start_height`, yielding
    /// `(height, hash)` pairs until `hash_by_height` is exhausted.
    pub fn scan_main_chain_from(&self, start_height: u32) -> ChainDbResult<Vec<(u32, Vec<u8>)>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(HASH_BY_HEIGHT)?;
        let mut out = Vec::new();
        for row in table.range(start_height.to_be_bytes().as_slice()..)? {
            let (k, v) = row?;
            let height = u32::from_be_bytes(k.value().try_into().unwrap());
            out.push((height, v.value().to_vec()));
        }
        Ok(out)
    }
}

/// Wraps a single open redb write transaction. Only one may be open at a
/// time per `Store`; the caller is responsible for not opening a second
/// before this one commits or drops (redb itself enforces exclusivity by
/// blocking, which would deadlock a single-writer model, so callers must
/// never attempt it).
pub struct WriteBatch<'db> {
    tx: WriteTransaction,
    _marker: std::marker::PhantomData<&'db ()>,
}

impl<'db> WriteBatch<'db> {
    fn new(tx: WriteTransaction) -> Self {
        WriteBatch { tx, _marker: std::marker::PhantomData }
    }

    pub fn put_chain_state(&self, bytes: &[u8]) -> ChainDbResult<()> {
        self.put(CHAIN_STATE, b"", bytes)
    }

    pub fn put_chain_flags(&self, bytes: &[u8]) -> ChainDbResult<()> {
        self.put(CHAIN_FLAGS, b"", bytes)
    }

    pub fn put_deployments(&self, bytes: &[u8]) -> ChainDbResult<()> {
        self.put(DEPLOYMENTS, b"", bytes)
    }

    pub fn put_entry(&self, hash: &[u8], bytes: &[u8]) -> ChainDbResult<()> {
        self.put(ENTRIES, hash, bytes)
    }

    pub fn put_height_by_hash(&self, hash: &[u8], height: u32) -> ChainDbResult<()> {
        self.put(HEIGHT_BY_HASH, hash, &height.to_le_bytes())
    }

    pub fn put_hash_by_height(&self, height: u32, hash: &[u8]) -> ChainDbResult<()> {
        self.put(HASH_BY_HEIGHT, &height.to_be_bytes(), hash)
    }

    pub fn delete_hash_by_height(&self, height: u32) -> ChainDbResult<()> {
        self.delete(HASH_BY_HEIGHT, &height.to_be_bytes())
    }

    pub fn put_next_hash(&self, prev: &[u8], next: &[u8]) -> ChainDbResult<()> {
        self.put(NEXT_HASH, prev, next)
    }

    pub fn delete_next_hash(&self, prev: &[u8]) -> ChainDbResult<()> {
        self.delete(NEXT_HASH, prev)
    }

    pub fn put_tip(&self, hash: &[u8]) -> ChainDbResult<()> {
        self.put(TIP_SET, hash, &[0u8])
    }

    pub fn delete_tip(&self, hash: &[u8]) -> ChainDbResult<()> {
        self.delete(TIP_SET, hash)
    }

    pub fn put_block(&self, hash: &[u8], bytes: &[u8]) -> ChainDbResult<()> {
        self.put(BLOCKS, hash, bytes)
    }

    pub fn delete_block(&self, hash: &[u8]) -> ChainDbResult<()> {
        self.delete(BLOCKS, hash)
    }

    pub fn put_undo(&self, hash: &[u8], bytes: &[u8]) -> ChainDbResult<()> {
        self.put(UNDO, hash, bytes)
    }

    pub fn delete_undo(&self, hash: &[u8]) -> ChainDbResult<()> {
        self.delete(UNDO, hash)
    }

    pub fn put_coins(&self, txid: &[u8], bytes: &[u8]) -> ChainDbResult<()> {
        self.put(COINS, txid, bytes)
    }

    pub fn delete_coins(&self, txid: &[u8]) -> ChainDbResult<()> {
        self.delete(COINS, txid)
    }

    pub fn put_state_cache(&self, key: &[u8], state: u8) -> ChainDbResult<()> {
        self.put(STATE_CACHE, key, &[state])
    }

    pub fn delete_state_cache(&self, key: &[u8]) -> ChainDbResult<()> {
        self.delete(STATE_CACHE, key)
    }

    pub fn put_tx_meta(&self, txid: &[u8], bytes: &[u8]) -> ChainDbResult<()> {
        self.put(TX_INDEX, txid, bytes)
    }

    pub fn delete_tx_meta(&self, txid: &[u8]) -> ChainDbResult<()> {
        self.delete(TX_INDEX, txid)
    }

    pub fn put_addr_tx(&self, key: &[u8]) -> ChainDbResult<()> {
        self.put(ADDR_TX, key, &[0u8])
    }

    pub fn delete_addr_tx(&self, key: &[u8]) -> ChainDbResult<()> {
        self.delete(ADDR_TX, key)
    }

    pub fn put_addr_outpoint(&self, key: &[u8]) -> ChainDbResult<()> {
        self.put(ADDR_OUTPOINT, key, &[0u8])
    }

    pub fn delete_addr_outpoint(&self, key: &[u8]) -> ChainDbResult<()> {
        self.delete(ADDR_OUTPOINT, key)
    }

    fn put(&self, table_def: TableDefinition<&[u8], &[u8]>, key: &[u8], value: &[u8]) -> ChainDbResult<()> {
        let mut table = self.tx.open_table(table_def)?;
        table.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, table_def: TableDefinition<&[u8], &[u8]>, key: &[u8]) -> ChainDbResult<()> {
        let mut table = self.tx.open_table(table_def)?;
        table.remove(key)?;
        Ok(())
    }

    pub fn commit(self) -> ChainDbResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn drop_batch(self) {
        drop(self.tx);
    }
}
