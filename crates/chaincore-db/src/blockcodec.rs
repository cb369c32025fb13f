//! Wire encoding for full blocks and transactions as persisted under the
//! `b` prefix. Block body validation (merkle root, weight, sigops) is
//! delegated to an external collaborator; this module only needs a
//! deterministic round trip so a stored block can be decoded again to walk
//! its transactions during disconnection or indexing.

use chaincore_consensus::types::{Block, BlockHeader, OutPoint, Tx, TxIn, TxOut};
use chaincore_primitives::{compact_size_decode, compact_size_encode, Hash};

use crate::error::{ChainDbError, ChainDbResult};

pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&block.header.to_wire_bytes());
    out.extend(compact_size_encode(block.txs.len() as u64));
    for tx in &block.txs {
        encode_tx(tx, &mut out);
    }
    out
}

fn encode_tx(tx: &Tx, out: &mut Vec<u8>) {
    out.extend_from_slice(&tx.version.to_le_bytes());
    out.extend(compact_size_encode(tx.inputs.len() as u64));
    for input in &tx.inputs {
        out.extend_from_slice(input.prevout.txid.as_bytes());
        out.extend_from_slice(&input.prevout.vout.to_le_bytes());
        out.extend(compact_size_encode(input.script_sig.len() as u64));
        out.extend_from_slice(&input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
        out.extend(compact_size_encode(input.witness.len() as u64));
        for item in &input.witness {
            out.extend(compact_size_encode(item.len() as u64));
            out.extend_from_slice(item);
        }
    }
    out.extend(compact_size_encode(tx.outputs.len() as u64));
    for output in &tx.outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        out.extend(compact_size_encode(output.script_pubkey.len() as u64));
        out.extend_from_slice(&output.script_pubkey);
    }
    out.extend_from_slice(&tx.locktime.to_le_bytes());
}

pub fn decode_block(data: &[u8]) -> ChainDbResult<Block> {
    if data.len() < 80 {
        return Err(ChainDbError::Corruption("block: truncated header".into()));
    }
    let mut header_bytes = [0u8; 80];
    header_bytes.copy_from_slice(&data[0..80]);
    let header = BlockHeader::from_wire_bytes(&header_bytes);

    let mut pos = 80;
    let (tx_count, used) = compact_size_decode(&data[pos..])
        .map_err(|e| ChainDbError::Corruption(format!("block: {e}")))?;
    pos += used;

    let mut txs = Vec::with_capacity(tx_count as usize);
    for _ in 0..tx_count {
        let (tx, used) = decode_tx(&data[pos..])?;
        pos += used;
        txs.push(tx);
    }
    Ok(Block { header, txs })
}

fn decode_tx(data: &[u8]) -> ChainDbResult<(Tx, usize)> {
    let err = |msg: &str| ChainDbError::Corruption(format!("tx: {msg}"));
    if data.len() < 4 {
        return Err(err("truncated version"));
    }
    let version = i32::from_le_bytes(data[0..4].try_into().unwrap());
    let mut pos = 4;

    let (in_count, used) = compact_size_decode(&data[pos..]).map_err(|e| err(&e))?;
    pos += used;
    let mut inputs = Vec::with_capacity(in_count as usize);
    for _ in 0..in_count {
        if pos + 36 > data.len() {
            return Err(err("truncated input prevout"));
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&data[pos..pos + 32]);
        pos += 32;
        let vout = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let (script_len, used) = compact_size_decode(&data[pos..]).map_err(|e| err(&e))?;
        pos += used;
        let script_len = script_len as usize;
        if pos + script_len + 4 > data.len() {
            return Err(err("truncated script_sig"));
        }
        let script_sig = data[pos..pos + script_len].to_vec();
        pos += script_len;
        let sequence = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let (witness_count, used) = compact_size_decode(&data[pos..]).map_err(|e| err(&e))?;
        pos += used;
        let mut witness = Vec::with_capacity(witness_count as usize);
        for _ in 0..witness_count {
            let (item_len, used) = compact_size_decode(&data[pos..]).map_err(|e| err(&e))?;
            pos += used;
            let item_len = item_len as usize;
            if pos + item_len > data.len() {
                return Err(err("truncated witness item"));
            }
            witness.push(data[pos..pos + item_len].to_vec());
            pos += item_len;
        }
        inputs.push(TxIn {
            prevout: OutPoint { txid: Hash::from_bytes(txid), vout },
            script_sig,
            sequence,
            witness,
        });
    }

    let (out_count, used) = compact_size_decode(&data[pos..]).map_err(|e| err(&e))?;
    pos += used;
    let mut outputs = Vec::with_capacity(out_count as usize);
    for _ in 0..out_count {
        if pos + 8 > data.len() {
            return Err(err("truncated output value"));
        }
        let value = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let (script_len, used) = compact_size_decode(&data[pos..]).map_err(|e| err(&e))?;
        pos += used;
        let script_len = script_len as usize;
        if pos + script_len > data.len() {
            return Err(err("truncated script_pubkey"));
        }
        let script_pubkey = data[pos..pos + script_len].to_vec();
        pos += script_len;
        outputs.push(TxOut { value, script_pubkey });
    }

    if pos + 4 > data.len() {
        return Err(err("truncated locktime"));
    }
    let locktime = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
    pos += 4;

    Ok((Tx { version, inputs, outputs, locktime }, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_roundtrip() {
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash::ZERO,
                merkle_root: Hash::ZERO,
                timestamp: 123,
                bits: 0x1d00ffff,
                nonce: 7,
            },
            txs: vec![Tx {
                version: 1,
                inputs: vec![TxIn {
                    prevout: OutPoint { txid: Hash::ZERO, vout: u32::MAX },
                    script_sig: vec![1, 2, 3],
                    sequence: 0xffffffff,
                    witness: vec![],
                }],
                outputs: vec![TxOut { value: 5_000_000_000, script_pubkey: vec![0x51] }],
                locktime: 0,
            }],
        };
        let bytes = encode_block(&block);
        let back = decode_block(&bytes).unwrap();
        assert_eq!(back, block);
    }
}
