//! Narrow cryptography and script-verification interface consumed by the
//! chain state machine.
//!
//! Consensus and chain code depend only on the traits in this crate, never
//! on a concrete signature scheme or script interpreter: the real worker
//! pool that executes scripts and checks signatures is an external
//! collaborator (its own process/thread-pool, typically), wired in by the
//! host at startup.

use std::future::Future;
use std::pin::Pin;

/// Bit-set of consensus script flags, one bit per named rule group.
/// Opaque to callers beyond the named constructors: the active set at any
/// height is a property of `DeploymentState`, not something chain code
/// computes from scratch per call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub const NONE: ScriptFlags = ScriptFlags(0);
    pub const MANDATORY: ScriptFlags = ScriptFlags(1 << 0);
    pub const P2SH: ScriptFlags = ScriptFlags(1 << 1);
    pub const DERSIG: ScriptFlags = ScriptFlags(1 << 2);
    pub const CLTV: ScriptFlags = ScriptFlags(1 << 3);
    pub const CSV: ScriptFlags = ScriptFlags(1 << 4);
    pub const WITNESS: ScriptFlags = ScriptFlags(1 << 5);
    pub const NULLDUMMY: ScriptFlags = ScriptFlags(1 << 6);

    pub fn union(self, other: ScriptFlags) -> ScriptFlags {
        ScriptFlags(self.0 | other.0)
    }

    pub fn contains(self, other: ScriptFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ScriptFlags {
    type Output = ScriptFlags;
    fn bitor(self, rhs: ScriptFlags) -> ScriptFlags {
        self.union(rhs)
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single transaction input's worth of material a script verifier needs:
/// the spending tx, the output it spends, and the active flag set.
pub struct VerifyTxJob<'a> {
    pub tx_bytes: &'a [u8],
    pub input_index: u32,
    pub prevout_value: u64,
    pub prevout_script: &'a [u8],
    pub flags: ScriptFlags,
}

/// Abstract script/signature verifier. The core forwards work here and
/// awaits the result; it never inspects how verification happens.
pub trait Verifier: Send + Sync {
    fn verify_tx<'a>(&'a self, job: VerifyTxJob<'a>) -> BoxFuture<'a, Result<bool, String>>;

    fn verify_signature<'a>(
        &'a self,
        msg: &'a [u8],
        sig: &'a [u8],
        pubkey: &'a [u8],
    ) -> BoxFuture<'a, Result<bool, String>>;
}

/// Double SHA-256, the hash function for block/tx ids and merkle trees.
pub fn hash256(data: &[u8]) -> [u8; 32] {
    *chaincore_primitives::double_sha256(data).as_bytes()
}

/// Single SHA-256, used for script hashing (P2SH, witness program hashes).
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let out = Sha256::digest(data);
    let mut r = [0u8; 32];
    r.copy_from_slice(&out);
    r
}

/// SHA-256 followed by RIPEMD-160, used for P2PKH/P2SH script hashes.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::Ripemd160;
    use sha2::{Digest, Sha256};
    let sha = Sha256::digest(data);
    let rmd = Ripemd160::digest(sha);
    let mut r = [0u8; 20];
    r.copy_from_slice(&rmd);
    r
}

/// A verifier that always approves, for devnets and tests where script
/// execution itself is not under test. Never wired in for a real chain.
#[cfg(feature = "dev-software")]
pub struct AcceptAllVerifier;

#[cfg(feature = "dev-software")]
impl Verifier for AcceptAllVerifier {
    fn verify_tx<'a>(&'a self, _job: VerifyTxJob<'a>) -> BoxFuture<'a, Result<bool, String>> {
        Box::pin(async { Ok(true) })
    }

    fn verify_signature<'a>(
        &'a self,
        _msg: &'a [u8],
        _sig: &'a [u8],
        _pubkey: &'a [u8],
    ) -> BoxFuture<'a, Result<bool, String>> {
        Box::pin(async { Ok(true) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash256_matches_double_sha256() {
        let a = hash256(b"abc");
        let b = *chaincore_primitives::double_sha256(b"abc").as_bytes();
        assert_eq!(a, b);
    }

    #[test]
    fn script_flags_union_and_contains() {
        let f = ScriptFlags::P2SH | ScriptFlags::WITNESS;
        assert!(f.contains(ScriptFlags::P2SH));
        assert!(f.contains(ScriptFlags::WITNESS));
        assert!(!f.contains(ScriptFlags::CSV));
    }
}
