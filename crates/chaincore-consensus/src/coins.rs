//! Transient per-block unspent-output view and its undo log.
//!
//! A [`CoinView`] is built fresh for each block being validated: it loads
//! referenced outputs from the backing store on demand, stages all
//! mutations caused by the block, and produces an [`UndoCoins`] record that
//! lets disconnection replay those mutations in reverse with no further
//! lookups.

use std::collections::HashMap;

use chaincore_primitives::Hash;

use crate::types::{Coin, OutPoint, Tx, TxOut};

/// Per-tx record of output spend state, as stored under the `c` prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coins {
    pub version: i32,
    pub coinbase: bool,
    pub height: u32,
    /// `None` at an index means the output has been spent and removed.
    pub outputs: Vec<Option<TxOut>>,
}

impl Coins {
    pub fn from_tx(tx: &Tx, height: u32) -> Self {
        Coins {
            version: tx.version,
            coinbase: tx.is_coinbase(),
            height,
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
        }
    }

    /// True once every output has been spent: the record may be fully
    /// removed from the store.
    pub fn is_fully_spent(&self) -> bool {
        self.outputs.iter().all(|o| o.is_none())
    }

    pub fn get(&self, vout: u32) -> Option<&TxOut> {
        self.outputs.get(vout as usize).and_then(|o| o.as_ref())
    }

    pub fn spend(&mut self, vout: u32) -> Option<TxOut> {
        self.outputs.get_mut(vout as usize).and_then(|o| o.take())
    }
}

/// One entry of the undo log: everything needed to recreate a spent output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoCoin {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
    pub coinbase: bool,
}

/// Append-only stack of undo entries for a single block, in input
/// iteration order. Disconnection replays it back-to-front.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UndoCoins {
    pub entries: Vec<UndoCoin>,
}

impl UndoCoins {
    pub fn push(&mut self, undo: UndoCoin) {
        self.entries.push(undo);
    }
}

/// Transient tx-hash -> Coins mapping staged while validating one block.
#[derive(Default)]
pub struct CoinView {
    entries: HashMap<Hash, Coins>,
    pub undo: UndoCoins,
}

impl CoinView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, txid: &Hash) -> Option<&Coins> {
        self.entries.get(txid)
    }

    pub fn insert(&mut self, txid: Hash, coins: Coins) {
        self.entries.insert(txid, coins);
    }

    pub fn remove(&mut self, txid: &Hash) -> Option<Coins> {
        self.entries.remove(txid)
    }

    /// Spends a referenced output, recording the undo entry. Returns the
    /// spent output's value and script for the caller's fee/script checks.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<TxOut> {
        let coins = self.entries.get_mut(&outpoint.txid)?;
        let height = coins.height;
        let coinbase = coins.coinbase;
        let out = coins.spend(outpoint.vout)?;
        self.undo.push(UndoCoin {
            value: out.value,
            script_pubkey: out.script_pubkey.clone(),
            height,
            coinbase,
        });
        if coins.is_fully_spent() {
            self.entries.remove(&outpoint.txid);
        }
        Some(out)
    }

    pub fn apply_tx(&mut self, tx: &Tx, height: u32) {
        self.insert(tx.txid(), Coins::from_tx(tx, height));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &Coins)> {
        self.entries.iter()
    }
}
