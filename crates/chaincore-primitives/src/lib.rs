//! Encoding primitives shared by the rest of the chain stack: the opaque
//! hash type, CompactSize integers, and compact-bits target arithmetic.

pub mod compact;
pub mod hash;
pub mod varint;

pub use compact::{
    bytes32_to_target, compact_to_target, pow_limit_from_bits, target_to_bytes32,
    target_to_compact, work_from_target,
};
pub use hash::{double_sha256, Hash};
pub use varint::{compact_size_decode, compact_size_encode, hex_decode_strict};
