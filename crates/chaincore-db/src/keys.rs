//! Canonical byte encoding for every persisted record and key. All
//! multi-byte numeric *keys* are big-endian so lexicographic table order
//! matches numeric order; record *values* are little-endian, matching the
//! rest of the wire format.

use chaincore_primitives::Hash;

use crate::error::{ChainDbError, ChainDbResult};

// ---------------------------------------------------------------------------
// ChainState — the `R` record.
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainState {
    pub tip_hash: Hash,
    pub tx_count: u64,
    pub coin_count: u64,
    pub total_value: u64,
}

pub const CHAIN_STATE_BYTES: usize = 56;

pub fn encode_chain_state(s: &ChainState) -> [u8; CHAIN_STATE_BYTES] {
    let mut out = [0u8; CHAIN_STATE_BYTES];
    out[0..32].copy_from_slice(s.tip_hash.as_bytes());
    out[32..40].copy_from_slice(&s.tx_count.to_le_bytes());
    out[40..48].copy_from_slice(&s.coin_count.to_le_bytes());
    out[48..56].copy_from_slice(&s.total_value.to_le_bytes());
    out
}

pub fn decode_chain_state(data: &[u8]) -> ChainDbResult<ChainState> {
    if data.len() != CHAIN_STATE_BYTES {
        return Err(ChainDbError::Corruption(format!(
            "chain_state: expected {CHAIN_STATE_BYTES} bytes, got {}",
            data.len()
        )));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&data[0..32]);
    Ok(ChainState {
        tip_hash: Hash::from_bytes(hash),
        tx_count: u64::from_le_bytes(data[32..40].try_into().unwrap()),
        coin_count: u64::from_le_bytes(data[40..48].try_into().unwrap()),
        total_value: u64::from_le_bytes(data[48..56].try_into().unwrap()),
    })
}

// ---------------------------------------------------------------------------
// ChainFlags — the `O` record.
// ---------------------------------------------------------------------------

pub const CHAIN_MAGIC: u32 = 0x434f_5245; // "CORE"

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainFlags {
    pub magic: u32,
    pub spv: bool,
    pub witness: bool,
    pub prune: bool,
    pub index_tx: bool,
    pub index_address: bool,
}

pub const CHAIN_FLAGS_BYTES: usize = 12;

impl ChainFlags {
    fn bits(&self) -> u32 {
        (self.spv as u32)
            | (self.witness as u32) << 1
            | (self.prune as u32) << 2
            | (self.index_tx as u32) << 3
            | (self.index_address as u32) << 4
    }

    fn from_bits(magic: u32, bits: u32) -> Self {
        ChainFlags {
            magic,
            spv: bits & 1 != 0,
            witness: bits & 2 != 0,
            prune: bits & 4 != 0,
            index_tx: bits & 8 != 0,
            index_address: bits & 16 != 0,
        }
    }
}

pub fn encode_chain_flags(f: &ChainFlags) -> [u8; CHAIN_FLAGS_BYTES] {
    let mut out = [0u8; CHAIN_FLAGS_BYTES];
    out[0..4].copy_from_slice(&f.magic.to_le_bytes());
    out[4..8].copy_from_slice(&f.bits().to_le_bytes());
    out
}

pub fn decode_chain_flags(data: &[u8]) -> ChainDbResult<ChainFlags> {
    if data.len() != CHAIN_FLAGS_BYTES {
        return Err(ChainDbError::Corruption(format!(
            "chain_flags: expected {CHAIN_FLAGS_BYTES} bytes, got {}",
            data.len()
        )));
    }
    let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
    let bits = u32::from_le_bytes(data[4..8].try_into().unwrap());
    Ok(ChainFlags::from_bits(magic, bits))
}

// ---------------------------------------------------------------------------
// Deployment table — the `V` record.
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub bit: u8,
    pub start_time: u32,
    pub timeout: u32,
}

pub fn encode_deployment_table(deployments: &[DeploymentRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + deployments.len() * 9);
    out.push(deployments.len() as u8);
    for d in deployments {
        out.push(d.bit);
        out.extend_from_slice(&d.start_time.to_le_bytes());
        out.extend_from_slice(&d.timeout.to_le_bytes());
    }
    out
}

pub fn decode_deployment_table(data: &[u8]) -> ChainDbResult<Vec<DeploymentRecord>> {
    if data.is_empty() {
        return Err(ChainDbError::Corruption("deployment table: empty".into()));
    }
    let count = data[0] as usize;
    let expected_len = 1 + count * 9;
    if data.len() != expected_len {
        return Err(ChainDbError::Corruption(format!(
            "deployment table: expected {expected_len} bytes, got {}",
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let base = 1 + i * 9;
        out.push(DeploymentRecord {
            bit: data[base],
            start_time: u32::from_le_bytes(data[base + 1..base + 5].try_into().unwrap()),
            timeout: u32::from_le_bytes(data[base + 5..base + 9].try_into().unwrap()),
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Coins (`c` value) and UndoCoins (`u` value).
// ---------------------------------------------------------------------------

use chaincore_consensus::coins::{Coins, UndoCoin, UndoCoins};
use chaincore_consensus::types::TxOut;
use chaincore_primitives::{compact_size_decode, compact_size_encode};

pub fn encode_coins(coins: &Coins) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&coins.version.to_le_bytes());
    out.push(coins.coinbase as u8);
    out.extend_from_slice(&coins.height.to_le_bytes());
    out.extend(compact_size_encode(coins.outputs.len() as u64));
    for output in &coins.outputs {
        match output {
            None => out.push(0),
            Some(o) => {
                out.push(1);
                out.extend_from_slice(&o.value.to_le_bytes());
                out.extend(compact_size_encode(o.script_pubkey.len() as u64));
                out.extend_from_slice(&o.script_pubkey);
            }
        }
    }
    out
}

pub fn decode_coins(data: &[u8]) -> ChainDbResult<Coins> {
    if data.len() < 9 {
        return Err(ChainDbError::Corruption("coins: truncated header".into()));
    }
    let version = i32::from_le_bytes(data[0..4].try_into().unwrap());
    let coinbase = data[4] != 0;
    let height = u32::from_le_bytes(data[5..9].try_into().unwrap());
    let mut pos = 9;
    let (count, used) = compact_size_decode(&data[pos..])
        .map_err(|e| ChainDbError::Corruption(format!("coins: {e}")))?;
    pos += used;
    let mut outputs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if pos >= data.len() {
            return Err(ChainDbError::Corruption("coins: truncated output tag".into()));
        }
        let tag = data[pos];
        pos += 1;
        if tag == 0 {
            outputs.push(None);
            continue;
        }
        if pos + 8 > data.len() {
            return Err(ChainDbError::Corruption("coins: truncated value".into()));
        }
        let value = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let (script_len, used) = compact_size_decode(&data[pos..])
            .map_err(|e| ChainDbError::Corruption(format!("coins: {e}")))?;
        pos += used;
        let script_len = script_len as usize;
        if pos + script_len > data.len() {
            return Err(ChainDbError::Corruption("coins: truncated script".into()));
        }
        let script_pubkey = data[pos..pos + script_len].to_vec();
        pos += script_len;
        outputs.push(Some(TxOut { value, script_pubkey }));
    }
    Ok(Coins { version, coinbase, height, outputs })
}

pub fn encode_undo(undo: &UndoCoins) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(compact_size_encode(undo.entries.len() as u64));
    for e in &undo.entries {
        out.extend_from_slice(&e.value.to_le_bytes());
        out.extend(compact_size_encode(e.script_pubkey.len() as u64));
        out.extend_from_slice(&e.script_pubkey);
        out.extend_from_slice(&e.height.to_le_bytes());
        out.push(e.coinbase as u8);
    }
    out
}

pub fn decode_undo(data: &[u8]) -> ChainDbResult<UndoCoins> {
    let (count, mut pos) = compact_size_decode(data)
        .map_err(|e| ChainDbError::Corruption(format!("undo: {e}")))?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if pos + 8 > data.len() {
            return Err(ChainDbError::Corruption("undo: truncated value".into()));
        }
        let value = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let (script_len, used) = compact_size_decode(&data[pos..])
            .map_err(|e| ChainDbError::Corruption(format!("undo: {e}")))?;
        pos += used;
        let script_len = script_len as usize;
        if pos + script_len + 5 > data.len() {
            return Err(ChainDbError::Corruption("undo: truncated entry".into()));
        }
        let script_pubkey = data[pos..pos + script_len].to_vec();
        pos += script_len;
        let height = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let coinbase = data[pos] != 0;
        pos += 1;
        entries.push(UndoCoin { value, script_pubkey, height, coinbase });
    }
    Ok(UndoCoins { entries })
}

// ---------------------------------------------------------------------------
// Key builders for the remaining prefixes.
// ---------------------------------------------------------------------------

pub fn bit_hash_key(bit: u8, hash: &Hash) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = bit;
    out[1..33].copy_from_slice(hash.as_bytes());
    out
}

pub fn addr_tx_key(addr_hash: &[u8; 20], txid: &Hash) -> [u8; 52] {
    let mut out = [0u8; 52];
    out[0..20].copy_from_slice(addr_hash);
    out[20..52].copy_from_slice(txid.as_bytes());
    out
}

pub fn addr_outpoint_key(addr_hash: &[u8; 20], txid: &Hash, vout: u32) -> [u8; 56] {
    let mut out = [0u8; 56];
    out[0..20].copy_from_slice(addr_hash);
    out[20..52].copy_from_slice(txid.as_bytes());
    out[52..56].copy_from_slice(&vout.to_be_bytes());
    out
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxMeta {
    pub block_hash: Hash,
    pub height: u32,
    pub index: u32,
}

pub fn encode_tx_meta(m: &TxMeta) -> [u8; 40] {
    let mut out = [0u8; 40];
    out[0..32].copy_from_slice(m.block_hash.as_bytes());
    out[32..36].copy_from_slice(&m.height.to_le_bytes());
    out[36..40].copy_from_slice(&m.index.to_le_bytes());
    out
}

pub fn decode_tx_meta(data: &[u8]) -> ChainDbResult<TxMeta> {
    if data.len() != 40 {
        return Err(ChainDbError::Corruption(format!(
            "tx_meta: expected 40 bytes, got {}",
            data.len()
        )));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&data[0..32]);
    Ok(TxMeta {
        block_hash: Hash::from_bytes(hash),
        height: u32::from_le_bytes(data[32..36].try_into().unwrap()),
        index: u32::from_le_bytes(data[36..40].try_into().unwrap()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_state_roundtrip() {
        let s = ChainState {
            tip_hash: Hash::from_bytes([7u8; 32]),
            tx_count: 100,
            coin_count: 200,
            total_value: 300,
        };
        let bytes = encode_chain_state(&s);
        assert_eq!(decode_chain_state(&bytes).unwrap(), s);
    }

    #[test]
    fn chain_flags_roundtrip() {
        let f = ChainFlags {
            magic: CHAIN_MAGIC,
            spv: false,
            witness: true,
            prune: true,
            index_tx: false,
            index_address: true,
        };
        let bytes = encode_chain_flags(&f);
        assert_eq!(decode_chain_flags(&bytes).unwrap(), f);
    }

    #[test]
    fn deployment_table_roundtrip() {
        let table = vec![
            DeploymentRecord { bit: 0, start_time: 100, timeout: 200 },
            DeploymentRecord { bit: 1, start_time: 300, timeout: 400 },
        ];
        let bytes = encode_deployment_table(&table);
        assert_eq!(decode_deployment_table(&bytes).unwrap(), table);
    }

    #[test]
    fn coins_roundtrip_with_spent_outputs() {
        let coins = Coins {
            version: 1,
            coinbase: true,
            height: 10,
            outputs: vec![
                Some(TxOut { value: 5, script_pubkey: vec![1, 2, 3] }),
                None,
            ],
        };
        let bytes = encode_coins(&coins);
        assert_eq!(decode_coins(&bytes).unwrap(), coins);
    }

    #[test]
    fn undo_roundtrip() {
        let undo = UndoCoins {
            entries: vec![UndoCoin {
                value: 5,
                script_pubkey: vec![9, 9],
                height: 3,
                coinbase: false,
            }],
        };
        let bytes = encode_undo(&undo);
        assert_eq!(decode_undo(&bytes).unwrap(), undo);
    }
}
