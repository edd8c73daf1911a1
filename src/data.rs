// Modern, minimalistic & standard-compliant library for bitcoin taproot staking.
//
// SPDX-License-Identifier: Apache-2.0
//
// Designed in 2019-2025 by Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
// Written in 2024-2025 by Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2019-2024 LNP/BP Standards Association, Switzerland.
// Copyright (C) 2024-2025 LNP/BP Labs, Institute for Distributed and Cognitive Systems (InDCS).
// Copyright (C) 2019-2025 Dr Maxim Orlovsky.
// All rights under the above copyrights are reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::{Cursor, Read, Write};

use amplify::{Bytes32, IoError};
use bc::{LockTime, SeqNo, TapScript, TxOut, TxVer, Txid, VarInt, Vout};
use derive::KeyOrigin;

use crate::{Decode, DecodeError, Encode, PsbtError};

pub const TAPROOT_LEAF_TAPSCRIPT: u8 = 0xc0;

/// Taproot leaf script as kept in `PSBT_IN_TAP_LEAF_SCRIPT` values: the
/// script itself followed by a single leaf version byte.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct LeafScript {
    pub script: TapScript,
    pub leaf_version: u8,
}

impl LeafScript {
    /// Wraps a tapscript under the current (`0xc0`) leaf version.
    pub fn tap_script(script: TapScript) -> Self {
        LeafScript {
            script,
            leaf_version: TAPROOT_LEAF_TAPSCRIPT,
        }
    }
}

impl Encode for LeafScript {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(self.script.as_slice())?;
        self.leaf_version.encode(writer)?;
        Ok(self.script.len() + 1)
    }
}

impl Decode for LeafScript {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let (leaf_version, script) =
            buf.split_last().ok_or(DecodeError::Psbt(PsbtError::UnexpectedEod))?;
        Ok(LeafScript {
            script: TapScript::from_unsafe(script.to_vec()),
            leaf_version: *leaf_version,
        })
    }
}

/// A compact size unsigned integer representing the number of leaf hashes,
/// followed by a list of leaf hashes, followed by the 4 byte master key
/// fingerprint concatenated with the derivation path of the public key. The
/// derivation path is represented as 32-bit little endian unsigned integer
/// indexes concatenated with each other. The leaf hashes are of the leaves
/// which involve this public key.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TapDerivation {
    pub leaf_hashes: Vec<Bytes32>,
    pub origin: KeyOrigin,
}

impl TapDerivation {
    /// Derivation entry of an internal key, which participates in no leaves.
    pub fn with_internal_key(origin: KeyOrigin) -> Self {
        TapDerivation {
            leaf_hashes: empty!(),
            origin,
        }
    }
}

impl Encode for TapDerivation {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = VarInt::with(self.leaf_hashes.len()).encode(writer)?;
        for hash in &self.leaf_hashes {
            counter += hash.encode(writer)?;
        }
        counter += self.origin.encode(writer)?;
        Ok(counter)
    }
}

impl Decode for TapDerivation {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let count = VarInt::decode(reader)?;
        let mut leaf_hashes = Vec::with_capacity(count.to_usize());
        for _ in 0..count.to_u64() {
            leaf_hashes.push(Bytes32::decode(reader)?);
        }
        let origin = KeyOrigin::decode(reader)?;
        Ok(TapDerivation {
            leaf_hashes,
            origin,
        })
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct UnsignedTxIn {
    pub txid: Txid,
    pub vout: Vout,
    pub sequence: SeqNo,
    /// Witness stack found next to the input in a consensus-serialized
    /// transaction; always empty for the transaction embedded into a v0
    /// document.
    pub witness: Vec<Vec<u8>>,
}

/// Transaction data backing a PSBT: either the unsigned transaction embedded
/// into a v0 document, or a consensus-serialized transaction a new document
/// is imported from.
///
/// The embedded v0 transaction must be decoded with a dedicated strict-legacy
/// reader and not with the general consensus decoder: since its scriptSigs
/// are always empty, a transaction with zero inputs is indistinguishable from
/// a segwit marker and would be misread.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct UnsignedTx {
    pub version: TxVer,
    pub inputs: Vec<UnsignedTxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: LockTime,
}

impl Decode for UnsignedTx {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let version = TxVer::decode(reader)?;

        let input_count = VarInt::decode(reader)?;
        let mut inputs = Vec::with_capacity(input_count.to_usize());
        for _ in 0..input_count.to_u64() {
            let txid = Txid::decode(reader)?;
            let vout = Vout::decode(reader)?;
            skip_var_bytes(reader)?;
            let sequence = SeqNo::decode(reader)?;
            inputs.push(UnsignedTxIn {
                txid,
                vout,
                sequence,
                witness: vec![],
            });
        }

        let output_count = VarInt::decode(reader)?;
        let mut outputs = Vec::with_capacity(output_count.to_usize());
        for _ in 0..output_count.to_u64() {
            outputs.push(TxOut::decode(reader)?);
        }

        let lock_time = LockTime::decode(reader)?;
        Ok(UnsignedTx {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

impl UnsignedTx {
    /// Reads a consensus-serialized transaction, including a segwit one,
    /// preserving the witness stacks for later inspection.
    pub fn consensus_parse(raw: &[u8]) -> Result<Self, PsbtError> {
        let reader = &mut Cursor::new(raw);
        let version = TxVer::decode(reader)?;

        let mut input_count = VarInt::decode(reader)?;
        let mut segwit = false;
        if input_count == 0u64 {
            let flag = u8::decode(reader)?;
            if flag != 0x01 {
                return Err(PsbtError::UnsupportedSegwitFlag(flag));
            }
            segwit = true;
            input_count = VarInt::decode(reader)?;
        }

        let mut inputs = Vec::with_capacity(input_count.to_usize());
        for _ in 0..input_count.to_u64() {
            let txid = Txid::decode(reader)?;
            let vout = Vout::decode(reader)?;
            skip_var_bytes(reader)?;
            let sequence = SeqNo::decode(reader)?;
            inputs.push(UnsignedTxIn {
                txid,
                vout,
                sequence,
                witness: vec![],
            });
        }

        let output_count = VarInt::decode(reader)?;
        let mut outputs = Vec::with_capacity(output_count.to_usize());
        for _ in 0..output_count.to_u64() {
            outputs.push(TxOut::decode(reader)?);
        }

        if segwit {
            for input in &mut inputs {
                let item_count = VarInt::decode(reader)?;
                let mut witness = Vec::with_capacity(item_count.to_usize());
                for _ in 0..item_count.to_u64() {
                    let len = VarInt::decode(reader)?;
                    let mut item = vec![0u8; len.to_usize()];
                    reader.read_exact(&mut item).map_err(|_| PsbtError::UnexpectedEod)?;
                    witness.push(item);
                }
                input.witness = witness;
            }
        }

        let lock_time = LockTime::decode(reader)?;
        if reader.position() != raw.len() as u64 {
            return Err(PsbtError::DataNotConsumed);
        }

        Ok(UnsignedTx {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

/// Detects witness stacks produced by a taproot spend: a lone BIP340
/// signature (64 bytes, or 65 with an explicit sighash flag), or a stack
/// terminated by a control block (33 bytes plus a whole number of 32-byte
/// merkle steps, tagged with the taproot leaf version).
pub(crate) fn is_taproot_witness(witness: &[Vec<u8>]) -> bool {
    let Some(last) = witness.last() else {
        return false;
    };
    let len = last.len();
    if witness.len() == 1 && (len == 64 || len == 65) {
        return true;
    }
    len >= 33 && (len - 33) % 32 == 0 && last[0] & 0xfe == TAPROOT_LEAF_TAPSCRIPT
}

fn skip_var_bytes(reader: &mut impl Read) -> Result<(), DecodeError> {
    let len = VarInt::decode(reader)?;
    let mut buf = vec![0u8; len.to_usize()];
    reader.read_exact(&mut buf)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use bc::Sats;

    use super::*;

    fn raw_legacy_tx() -> Vec<u8> {
        let mut raw = vec![0x02, 0x00, 0x00, 0x00];
        raw.push(0x01); // one input
        raw.extend_from_slice(&[0x11; 32]);
        raw.extend_from_slice(&[0x00; 4]); // vout 0
        raw.push(0x00); // empty scriptSig
        raw.extend_from_slice(&[0xff; 4]); // final sequence
        raw.push(0x01); // one output
        raw.extend_from_slice(&1000u64.to_le_bytes());
        raw.extend_from_slice(&[0x01, 0x51]);
        raw.extend_from_slice(&[0x00; 4]); // no locktime
        raw
    }

    #[test]
    fn legacy_tx_decode() {
        let tx = UnsignedTx::deserialize(raw_legacy_tx()).unwrap();
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, Sats(1000));
        assert_eq!(tx.outputs[0].script_pubkey.as_slice(), &[0x51]);
        assert!(tx.inputs[0].witness.is_empty());
    }

    #[test]
    fn segwit_tx_parse() {
        let mut raw = vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        raw.push(0x01); // one input
        raw.extend_from_slice(&[0x22; 32]);
        raw.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]); // vout 1
        raw.push(0x00);
        raw.extend_from_slice(&[0xff; 4]);
        raw.push(0x01); // one output
        raw.extend_from_slice(&500u64.to_le_bytes());
        raw.extend_from_slice(&[0x01, 0x51]);
        raw.push(0x01); // one witness element
        raw.push(0x40); // 64-byte signature
        raw.extend_from_slice(&[0xab; 64]);
        raw.extend_from_slice(&[0x00; 4]);

        let tx = UnsignedTx::consensus_parse(&raw).unwrap();
        assert_eq!(tx.inputs[0].witness.len(), 1);
        assert!(is_taproot_witness(&tx.inputs[0].witness));
    }

    #[test]
    fn taproot_witness_shapes() {
        assert!(!is_taproot_witness(&[]));
        assert!(is_taproot_witness(&[vec![0u8; 64]]));
        assert!(is_taproot_witness(&[vec![0u8; 65]]));
        // script path: sig, script, control block of depth one
        assert!(is_taproot_witness(&[vec![0u8; 64], vec![0x51], {
            let mut cb = vec![0xc1];
            cb.extend_from_slice(&[0u8; 32]);
            cb.extend_from_slice(&[0u8; 32]);
            cb
        }]));
        // segwit v0 two-element stack is not taproot
        assert!(!is_taproot_witness(&[vec![0u8; 72], vec![0u8; 33]]));
        assert!(!is_taproot_witness(&[vec![0u8; 34]]));
    }

    #[test]
    fn tap_derivation_path_alignment() {
        let mut value = vec![0x00]; // no leaf hashes
        value.extend_from_slice(&[0x64, 0x3a, 0x7a, 0xdc]);
        value.extend_from_slice(&86u32.to_le_bytes());

        let derivation = TapDerivation::deserialize(&value).unwrap();
        assert_eq!(derivation.origin.derivation().len(), 1);

        // stray bytes after the last path level must not be dropped
        value.extend_from_slice(&[0x01, 0x02]);
        assert!(TapDerivation::deserialize(&value).is_err());
    }

    #[test]
    fn leaf_script_roundtrip() {
        let mut value = vec![0x20];
        value.extend_from_slice(&[0x07; 32]);
        value.push(0xac);
        value.push(TAPROOT_LEAF_TAPSCRIPT);
        let leaf = LeafScript::deserialize(&value).unwrap();
        assert_eq!(leaf.leaf_version, TAPROOT_LEAF_TAPSCRIPT);
        assert_eq!(leaf.script.len(), 34);

        let mut encoded = Vec::new();
        leaf.encode(&mut encoded).unwrap();
        assert_eq!(encoded, value);
    }
}
