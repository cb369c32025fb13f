//! Chain-level configuration, separate from [`chaincore_db::ChainDbConfig`]
//! since it governs in-memory behavior rather than persistence.

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub max_orphans: usize,
    pub checkpoints: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig { max_orphans: 20, checkpoints: true }
    }
}
