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

use std::fmt::{self, Display, Formatter};

use amplify::Bytes32;
use bc::VarInt;
use bitcoin_hashes::{sha256, Hash, HashEngine};

use crate::data::TAPROOT_LEAF_TAPSCRIPT;
use crate::{Encode, PsbtError};

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_NUMEQUAL: u8 = 0x9c;
pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKSIGADD: u8 = 0xba;

/// A single element of a parsed tapscript: either a data push or an opcode.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum ScriptToken {
    Data(Vec<u8>),
    Op(u8),
}

impl ScriptToken {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            ScriptToken::Data(data) => Some(data),
            ScriptToken::Op(_) => None,
        }
    }

    /// Numeric value of a small-number opcode (`OP_1` through `OP_16`).
    pub fn small_num(&self) -> Option<u8> {
        match self {
            ScriptToken::Op(op) if (OP_1..=OP_16).contains(op) => Some(op - OP_1 + 1),
            _ => None,
        }
    }
}

impl Display for ScriptToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ScriptToken::Data(data) => {
                for byte in data {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            ScriptToken::Op(OP_0) => f.write_str("OP_0"),
            ScriptToken::Op(op) if (OP_1..=OP_16).contains(op) => {
                write!(f, "OP_{}", op - OP_1 + 1)
            }
            ScriptToken::Op(OP_NUMEQUAL) => f.write_str("OP_NUMEQUAL"),
            ScriptToken::Op(OP_CHECKSEQUENCEVERIFY) => f.write_str("OP_CHECKSEQUENCEVERIFY"),
            ScriptToken::Op(OP_CHECKSIG) => f.write_str("OP_CHECKSIG"),
            ScriptToken::Op(OP_CHECKSIGVERIFY) => f.write_str("OP_CHECKSIGVERIFY"),
            ScriptToken::Op(OP_CHECKSIGADD) => f.write_str("OP_CHECKSIGADD"),
            ScriptToken::Op(op) => write!(f, "OP_UNKNOWN({op:#04x})"),
        }
    }
}

/// Splits raw tapscript bytes into a flat token stream.
///
/// Direct pushes and all three `OP_PUSHDATA` forms become [`ScriptToken::Data`];
/// every other byte is kept as an opcode. A push running past the end of the
/// script fails with [`PsbtError::UnexpectedEod`].
pub fn decode_script(script: &[u8]) -> Result<Vec<ScriptToken>, PsbtError> {
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    while pos < script.len() {
        let op = script[pos];
        pos += 1;
        let push_len = match op {
            0x01..=0x4b => Some(op as usize),
            OP_PUSHDATA1 => {
                let len = *script.get(pos).ok_or(PsbtError::UnexpectedEod)? as usize;
                pos += 1;
                Some(len)
            }
            OP_PUSHDATA2 => {
                let bytes = script.get(pos..pos + 2).ok_or(PsbtError::UnexpectedEod)?;
                pos += 2;
                Some(u16::from_le_bytes([bytes[0], bytes[1]]) as usize)
            }
            OP_PUSHDATA4 => {
                let bytes = script.get(pos..pos + 4).ok_or(PsbtError::UnexpectedEod)?;
                pos += 4;
                Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
            }
            _ => None,
        };
        match push_len {
            Some(len) => {
                let data = script.get(pos..pos + len).ok_or(PsbtError::UnexpectedEod)?;
                pos += len;
                tokens.push(ScriptToken::Data(data.to_vec()));
            }
            None => tokens.push(ScriptToken::Op(op)),
        }
    }
    Ok(tokens)
}

/// BIP-341 leaf hash of a tapscript under the default leaf version:
/// `tagged_hash("TapLeaf", 0xc0 ‖ compact_size(len) ‖ script)`.
pub fn tap_leaf_hash(script: &[u8]) -> Bytes32 {
    let tag = sha256::Hash::hash(b"TapLeaf");
    let mut engine = sha256::Hash::engine();
    engine.input(tag.as_byte_array());
    engine.input(tag.as_byte_array());
    engine.input(&[TAPROOT_LEAF_TAPSCRIPT]);
    let mut len = Vec::new();
    VarInt::with(script.len())
        .encode(&mut len)
        .expect("in-memory encoding can't error");
    engine.input(&len);
    engine.input(script);
    Bytes32::from(*sha256::Hash::from_engine(engine).as_byte_array())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn direct_push_and_opcodes() {
        let script = [0x02, 0xe8, 0x03, OP_CHECKSIGVERIFY, OP_CHECKSEQUENCEVERIFY];
        let tokens = decode_script(&script).unwrap();
        assert_eq!(tokens, vec![
            ScriptToken::Data(vec![0xe8, 0x03]),
            ScriptToken::Op(OP_CHECKSIGVERIFY),
            ScriptToken::Op(OP_CHECKSEQUENCEVERIFY),
        ]);
    }

    #[test]
    fn pushdata_forms() {
        let mut script = vec![OP_PUSHDATA1, 0x03, 0xaa, 0xbb, 0xcc];
        script.extend_from_slice(&[OP_PUSHDATA2, 0x02, 0x00, 0x11, 0x22]);
        script.extend_from_slice(&[OP_PUSHDATA4, 0x01, 0x00, 0x00, 0x00, 0x33]);
        let tokens = decode_script(&script).unwrap();
        assert_eq!(tokens, vec![
            ScriptToken::Data(vec![0xaa, 0xbb, 0xcc]),
            ScriptToken::Data(vec![0x11, 0x22]),
            ScriptToken::Data(vec![0x33]),
        ]);
    }

    #[test]
    fn truncated_push() {
        assert_eq!(decode_script(&[0x05, 0x01]).unwrap_err(), PsbtError::UnexpectedEod);
        assert_eq!(decode_script(&[OP_PUSHDATA1]).unwrap_err(), PsbtError::UnexpectedEod);
        assert_eq!(decode_script(&[OP_PUSHDATA2, 0x05]).unwrap_err(), PsbtError::UnexpectedEod);
    }

    #[test]
    fn small_nums() {
        assert_eq!(ScriptToken::Op(OP_1).small_num(), Some(1));
        assert_eq!(ScriptToken::Op(OP_16).small_num(), Some(16));
        assert_eq!(ScriptToken::Op(OP_0).small_num(), None);
        assert_eq!(ScriptToken::Op(OP_CHECKSIG).small_num(), None);
        assert_eq!(ScriptToken::Data(vec![0x01]).small_num(), None);
    }

    #[test]
    fn token_display() {
        assert_eq!(ScriptToken::Data(vec![0xe8, 0x03]).to_string(), "e803");
        assert_eq!(ScriptToken::Op(OP_3 /* OP_1 + 2 */).to_string(), "OP_3");
        assert_eq!(ScriptToken::Op(OP_CHECKSIGADD).to_string(), "OP_CHECKSIGADD");
    }

    const OP_3: u8 = OP_1 + 2;

    #[test]
    fn leaf_hash_changes_with_script() {
        let a = tap_leaf_hash(&[0x51]);
        let b = tap_leaf_hash(&[0x52]);
        assert_ne!(a, b);
        // stable across calls
        assert_eq!(tap_leaf_hash(&[0x51]), a);
    }
}
