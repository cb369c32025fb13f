//! Network-independent consensus constants.

/// Size of the fixed portion of a block header that is hashed to produce
/// the block id: version, prevHash, merkleRoot, timestamp, bits, nonce.
pub const BLOCK_HEADER_BYTES: usize = 80;

/// Fixed on-disk size of a ChainEntry record.
pub const CHAIN_ENTRY_BYTES: usize = 116;

/// Fixed on-disk size of the ChainState record.
pub const CHAIN_STATE_BYTES: usize = 56;

/// Fixed on-disk size of the ChainFlags record.
pub const CHAIN_FLAGS_BYTES: usize = 12;

/// Number of timestamps sampled for median-time-past.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Top bits set on a block version to mark it as a version-bits header,
/// per BIP9 (0x20000000).
pub const VERSION_BITS_TOP_BITS: u32 = 0x2000_0000;
pub const VERSION_BITS_TOP_MASK: u32 = 0xe000_0000;
pub const VERSION_BITS_NUM_BITS: u32 = 29;

/// Maximum permitted future-dated timestamp, relative to network-observed
/// "now".
pub const MAX_FUTURE_BLOCK_TIME_SECS: u64 = 2 * 60 * 60;

/// Maximum accumulated weighted sigops per block.
pub const MAX_BLOCK_SIGOPS_COST: u64 = 80_000;

/// Maximum block weight once segwit is active.
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;

/// Height at which the single known BIP30 duplicate-coinbase exception is
/// allowed on mainnet.
pub const BIP30_EXCEPTION_HEIGHT_MAINNET: u32 = 227_836;

/// Minimum block versions once each deployment height activates.
pub const MIN_VERSION_AT_BIP34: i32 = 2;
pub const MIN_VERSION_AT_BIP66: i32 = 3;
pub const MIN_VERSION_AT_BIP65: i32 = 4;
