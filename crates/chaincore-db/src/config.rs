use chaincore_consensus::NetworkParams;

/// Persistence-affecting configuration, checked against on-disk
/// [`crate::keys::ChainFlags`] at startup.
#[derive(Clone, Debug)]
pub struct ChainDbConfig {
    pub network: NetworkParams,
    pub spv: bool,
    pub prune: bool,
    pub force_prune: bool,
    pub index_tx: bool,
    pub index_address: bool,
    pub force_witness: bool,
    pub entry_cache: usize,
    pub coin_cache_bytes: usize,
    pub keep_blocks: u32,
    pub prune_after: u32,
}

impl ChainDbConfig {
    pub fn new(network: NetworkParams) -> Self {
        ChainDbConfig {
            network,
            spv: false,
            prune: false,
            force_prune: false,
            index_tx: false,
            index_address: false,
            force_witness: false,
            entry_cache: 5000,
            coin_cache_bytes: 0,
            keep_blocks: 288,
            prune_after: 0,
        }
    }
}
