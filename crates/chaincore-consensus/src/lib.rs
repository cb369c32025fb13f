//! Consensus data model and rules: block/tx types, the ChainEntry header
//! record, BIP9 deployment state machine, and difficulty retargeting.
//!
//! This crate has no knowledge of storage or concurrency; it operates on
//! values passed in and a narrow [`chainentry::EntrySource`] trait for
//! ancestor queries, so it can be exercised with in-memory fixtures exactly
//! like the store-backed implementation.

pub mod bip9;
pub mod chainentry;
pub mod coins;
pub mod constants;
pub mod error;
pub mod params;
pub mod retarget;
pub mod types;

pub use bip9::{compute_block_version, compute_state, StateCache, ThresholdState};
pub use chainentry::{ChainEntry, EntrySource};
pub use coins::{CoinView, Coins, UndoCoin, UndoCoins};
pub use error::{VerifyError, VerifyResult};
pub use params::{Checkpoint, DeploymentParams, Network, NetworkParams};
pub use retarget::get_next_work_required;
pub use types::{Block, BlockHeader, Coin, OutPoint, Tx, TxIn, TxOut};
