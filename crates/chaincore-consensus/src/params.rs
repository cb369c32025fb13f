//! Network-wide consensus parameters: the shared immutable value that
//! stands in for the cyclic Chain/ChainDB back-reference — both sides hold
//! a copy instead of pointing at each other.

use std::collections::BTreeMap;

use chaincore_primitives::Hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: Hash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeploymentParams {
    pub bit: u8,
    pub start_time: u64,
    pub timeout: u64,
    /// Window length in blocks over which signaling is measured.
    pub period: u32,
    /// Minimum signaling blocks within a window for LOCKED_IN.
    pub threshold: u32,
}

#[derive(Clone, Debug)]
pub struct NetworkParams {
    pub network: Network,
    pub genesis_header_bytes: [u8; 80],
    pub pow_limit_bits: u32,
    pub target_timespan_secs: u64,
    pub target_spacing_secs: u64,
    pub retarget_interval: u32,
    /// Testnet-only: after this many multiples of target spacing with no
    /// block, difficulty may fall back to the network's proof-of-work
    /// limit.
    pub allow_min_difficulty_after_secs: Option<u64>,
    pub bip34_height: u32,
    pub bip65_height: u32,
    pub bip66_height: u32,
    pub bip30_exception_height: Option<u32>,
    pub checkpoints: Vec<Checkpoint>,
    pub deployments: Vec<DeploymentParams>,
    pub halving_interval: u32,
    pub initial_subsidy_sats: u64,
}

impl NetworkParams {
    pub fn retarget_interval(&self) -> u32 {
        self.retarget_interval
    }

    pub fn min_timespan(&self) -> u64 {
        self.target_timespan_secs / 4
    }

    pub fn max_timespan(&self) -> u64 {
        self.target_timespan_secs * 4
    }

    pub fn checkpoint_at(&self, height: u32) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.height == height)
    }

    pub fn last_checkpoint_height(&self) -> u32 {
        self.checkpoints.iter().map(|c| c.height).max().unwrap_or(0)
    }

    pub fn deployment(&self, bit: u8) -> Option<&DeploymentParams> {
        self.deployments.iter().find(|d| d.bit == bit)
    }

    pub fn deployment_table(&self) -> BTreeMap<u8, DeploymentParams> {
        self.deployments.iter().map(|d| (d.bit, *d)).collect()
    }

    pub fn reward_at(&self, height: u32) -> u64 {
        let halvings = height / self.halving_interval;
        if halvings >= 64 {
            return 0;
        }
        self.initial_subsidy_sats >> halvings
    }

    /// A conservative regtest configuration: short retarget window, no
    /// checkpoints, single always-on deployment bit for tests.
    pub fn regtest() -> Self {
        NetworkParams {
            network: Network::Regtest,
            genesis_header_bytes: [0u8; 80],
            pow_limit_bits: 0x207f_ffff,
            target_timespan_secs: 14 * 24 * 60 * 60,
            target_spacing_secs: 600,
            retarget_interval: 2016,
            allow_min_difficulty_after_secs: None,
            bip34_height: 0,
            bip65_height: 0,
            bip66_height: 0,
            bip30_exception_height: None,
            checkpoints: Vec::new(),
            deployments: Vec::new(),
            halving_interval: 150,
            initial_subsidy_sats: 50_0000_0000,
        }
    }
}
