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

use std::io::{Read, Write};

use amplify::{Bytes32, IoError};
use bc::{LockTime, Sats, ScriptPubkey, SeqNo, Tx, TxOut, TxVer, Txid, VarInt, Vout};
use derive::KeyOrigin;

use crate::data::is_taproot_witness;
use crate::{
    Decode, DecodeError, Encode, GlobalKey, InputKey, KeyData, KeyedMap, LeafScript, OutputKey,
    PsbtError, TapDerivation, UnsignedTx, ValueData,
};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum PsbtVer {
    #[display("v0")]
    V0 = 0x00,

    #[display("v2")]
    V2 = 0x02,
}

impl PsbtVer {
    pub const fn to_standard_u32(self) -> u32 { self as u32 }

    pub fn try_from_standard_u32(ver: u32) -> Result<Self, PsbtError> {
        Ok(match ver {
            0 => PsbtVer::V0,
            2 => PsbtVer::V2,
            wrong => return Err(PsbtError::UnsupportedVersion(wrong)),
        })
    }
}

fn encoded(value: impl Encode) -> ValueData {
    let mut data = Vec::new();
    value.encode(&mut data).expect("in-memory encoding can't error");
    ValueData::from(data)
}

/// Partially signed bitcoin transaction held as three kinds of keyed maps:
/// one global, one per input and one per output.
///
/// All field values, known or not, stay in the maps in their wire form; the
/// typed accessors parse on demand and encode on update, so a document is
/// re-emitted exactly as its maps stand.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Psbt {
    pub global: KeyedMap<GlobalKey>,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Input {
    index: usize,
    pub map: KeyedMap<InputKey>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Output {
    index: usize,
    pub map: KeyedMap<OutputKey>,
}

impl Psbt {
    const MAGIC: [u8; 5] = *b"psbt\xFF";

    /// Creates an empty v2 document with no inputs and no outputs.
    pub fn create() -> Psbt {
        let mut global = KeyedMap::new();
        global.set(GlobalKey::Version, encoded(PsbtVer::V2.to_standard_u32()));
        global.set(GlobalKey::TxVersion, encoded(TxVer::V2));
        global.set(GlobalKey::InputCount, encoded(VarInt::with(0usize)));
        global.set(GlobalKey::OutputCount, encoded(VarInt::with(0usize)));
        Psbt {
            global,
            inputs: vec![],
            outputs: vec![],
        }
    }

    /// Imports a consensus transaction into a fresh v2 document.
    ///
    /// Inputs already spending through taproot are rejected: a PSBT must
    /// start from an unsigned transaction.
    pub fn from_unsigned_tx(tx: &Tx) -> Result<Psbt, PsbtError> {
        let mut raw = Vec::new();
        tx.encode(&mut raw).expect("in-memory encoding can't error");
        let unsigned = UnsignedTx::consensus_parse(&raw)?;
        for (index, txin) in unsigned.inputs.iter().enumerate() {
            if is_taproot_witness(&txin.witness) {
                return Err(PsbtError::SignedTxInput(index));
            }
        }
        let mut psbt = Psbt::create();
        psbt.populate_from_tx(&unsigned)?;
        Ok(psbt)
    }

    pub fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = Self::MAGIC.len();
        writer.write_all(&Self::MAGIC)?;

        counter += self.global.encode(writer)?;

        for input in &self.inputs {
            counter += input.map.encode(writer)?;
        }

        for output in &self.outputs {
            counter += output.map.encode(writer)?;
        }

        Ok(counter)
    }

    pub fn encode_vec(&self, writer: &mut Vec<u8>) -> usize {
        self.encode(writer).expect("in-memory encoding can't error")
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut vec = Vec::new();
        self.encode_vec(&mut vec);
        vec
    }

    pub fn version(&self) -> Result<PsbtVer, PsbtError> {
        match self.global.get(GlobalKey::Version) {
            None => Ok(PsbtVer::V0),
            Some(value) => PsbtVer::try_from_standard_u32(u32::deserialize(value)?),
        }
    }

    pub fn tx_version(&self) -> Result<TxVer, PsbtError> {
        TxVer::deserialize(self.global.require(GlobalKey::TxVersion)?)
    }

    pub fn set_tx_version(&mut self, version: TxVer) {
        self.global.set(GlobalKey::TxVersion, encoded(version))
    }

    pub fn fallback_locktime(&self) -> Result<Option<LockTime>, PsbtError> {
        self.global.get(GlobalKey::FallbackLocktime).map(LockTime::deserialize).transpose()
    }

    pub fn set_fallback_locktime(&mut self, lock_time: LockTime) {
        self.global.set(GlobalKey::FallbackLocktime, encoded(lock_time))
    }

    pub fn input_count(&self) -> Result<usize, PsbtError> {
        Ok(VarInt::deserialize(self.global.require(GlobalKey::InputCount)?)?.to_usize())
    }

    pub fn output_count(&self) -> Result<usize, PsbtError> {
        Ok(VarInt::deserialize(self.global.require(GlobalKey::OutputCount)?)?.to_usize())
    }

    /// Raw `PSBT_GLOBAL_TX_MODIFIABLE` flags byte, kept opaque.
    pub fn tx_modifiable(&self) -> Result<Option<u8>, PsbtError> {
        self.global.get(GlobalKey::TxModifiable).map(u8::deserialize).transpose()
    }

    pub fn set_tx_modifiable(&mut self, flags: u8) {
        self.global.set(GlobalKey::TxModifiable, encoded(flags))
    }

    /// Key origin registered for a serialized extended public key.
    pub fn xpub(&self, xpub: &[u8]) -> Result<Option<KeyOrigin>, PsbtError> {
        self.global.get_keyed(GlobalKey::Xpub, xpub).map(KeyOrigin::deserialize).transpose()
    }

    pub fn set_xpub(&mut self, xpub: &[u8], origin: &KeyOrigin) {
        self.global.set_keyed(GlobalKey::Xpub, xpub, encoded(origin))
    }

    pub fn xpubs(&self) -> impl Iterator<Item = (&[u8], &ValueData)> {
        self.global.entries_of(GlobalKey::Xpub)
    }

    pub fn input(&self, index: usize) -> Option<&Input> { self.inputs.get(index) }

    pub fn input_mut(&mut self, index: usize) -> Option<&mut Input> { self.inputs.get_mut(index) }

    pub fn inputs(&self) -> impl Iterator<Item = &Input> { self.inputs.iter() }

    pub fn output(&self, index: usize) -> Option<&Output> { self.outputs.get(index) }

    pub fn output_mut(&mut self, index: usize) -> Option<&mut Output> {
        self.outputs.get_mut(index)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> { self.outputs.iter() }

    pub fn push_input(&mut self) -> &mut Input {
        let index = self.inputs.len();
        self.inputs.push(Input::new(index));
        self.global.set(GlobalKey::InputCount, encoded(VarInt::with(self.inputs.len())));
        &mut self.inputs[index]
    }

    pub fn push_output(&mut self) -> &mut Output {
        let index = self.outputs.len();
        self.outputs.push(Output::new(index));
        self.global.set(GlobalKey::OutputCount, encoded(VarInt::with(self.outputs.len())));
        &mut self.outputs[index]
    }

    /// Promotes a v0 document into v2 in place.
    ///
    /// The embedded unsigned transaction is decoded, its per-input and
    /// per-output data distributed into the respective maps, and the
    /// transaction entry dropped in favor of the v2 global fields. Running
    /// on a v2 document is a no-op; any other stored version fails.
    pub fn normalize(&mut self) -> Result<(), PsbtError> {
        if let Some(value) = self.global.get(GlobalKey::Version) {
            let ver = u32::deserialize(value)?;
            if ver == PsbtVer::V2.to_standard_u32() {
                return Ok(());
            }
            if ver != 0 {
                return Err(PsbtError::InvalidVersion(ver));
            }
        }
        let raw = self.global.require(GlobalKey::UnsignedTx)?.clone();
        let tx = UnsignedTx::deserialize(raw)?;
        self.populate_from_tx(&tx)?;
        self.global.remove(GlobalKey::UnsignedTx, &[]);
        self.global.set(GlobalKey::Version, encoded(PsbtVer::V2.to_standard_u32()));
        Ok(())
    }

    fn populate_from_tx(&mut self, tx: &UnsignedTx) -> Result<(), PsbtError> {
        self.global.set(GlobalKey::TxVersion, encoded(tx.version));
        self.global.set(GlobalKey::InputCount, encoded(VarInt::with(tx.inputs.len())));
        self.global.set(GlobalKey::OutputCount, encoded(VarInt::with(tx.outputs.len())));
        if tx.lock_time != LockTime::ZERO {
            self.global.set(GlobalKey::FallbackLocktime, encoded(tx.lock_time));
        }

        while self.inputs.len() < tx.inputs.len() {
            let index = self.inputs.len();
            self.inputs.push(Input::new(index));
        }
        while self.outputs.len() < tx.outputs.len() {
            let index = self.outputs.len();
            self.outputs.push(Output::new(index));
        }

        for (txin, input) in tx.inputs.iter().zip(&mut self.inputs) {
            input.map.set(InputKey::PreviousTxid, encoded(txin.txid));
            input.map.set(InputKey::OutputIndex, encoded(txin.vout));
            input.map.set(InputKey::Sequence, encoded(txin.sequence));
        }
        for (txout, output) in tx.outputs.iter().zip(&mut self.outputs) {
            output.set_amount(txout.value)?;
            output.set_script(&txout.script_pubkey);
        }
        Ok(())
    }
}

impl Encode for Psbt {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> { Psbt::encode(self, writer) }
}

impl Decode for Psbt {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 5];
        reader.read_exact(&mut magic)?;
        if magic != Self::MAGIC {
            return Err(PsbtError::InvalidMagic(magic.into()).into());
        }

        let global = KeyedMap::<GlobalKey>::decode(reader)?;

        let version = match global.get(GlobalKey::Version) {
            None => PsbtVer::V0,
            Some(value) => PsbtVer::try_from_standard_u32(u32::deserialize(value)?)?,
        };
        let (input_count, output_count) = match version {
            PsbtVer::V0 => {
                let tx = UnsignedTx::deserialize(global.require(GlobalKey::UnsignedTx)?)?;
                (tx.inputs.len(), tx.outputs.len())
            }
            PsbtVer::V2 => (
                VarInt::deserialize(global.require(GlobalKey::InputCount)?)?.to_usize(),
                VarInt::deserialize(global.require(GlobalKey::OutputCount)?)?.to_usize(),
            ),
        };

        let mut inputs = Vec::with_capacity(input_count);
        for index in 0..input_count {
            inputs.push(Input {
                index,
                map: KeyedMap::decode(reader)?,
            });
        }

        let mut outputs = Vec::with_capacity(output_count);
        for index in 0..output_count {
            outputs.push(Output {
                index,
                map: KeyedMap::decode(reader)?,
            });
        }

        let mut psbt = Psbt {
            global,
            inputs,
            outputs,
        };
        // any successfully parsed document comes out in v2 form
        psbt.normalize()?;
        Ok(psbt)
    }
}

impl Input {
    fn new(index: usize) -> Self {
        Input {
            index,
            map: KeyedMap::new(),
        }
    }

    pub fn index(&self) -> usize { self.index }

    pub fn previous_txid(&self) -> Result<Txid, PsbtError> {
        Txid::deserialize(self.map.require(InputKey::PreviousTxid)?)
    }

    pub fn output_index(&self) -> Result<Vout, PsbtError> {
        Vout::deserialize(self.map.require(InputKey::OutputIndex)?)
    }

    /// Returns the input sequence number, or the final sequence when the
    /// field is absent.
    pub fn sequence(&self) -> Result<SeqNo, PsbtError> {
        match self.map.get(InputKey::Sequence) {
            Some(value) => SeqNo::deserialize(value),
            None => Ok(SeqNo::from_consensus_u32(0xffff_ffff)),
        }
    }

    /// Whole previous transaction, needed for non-segwit spends.
    pub fn non_witness_utxo(&self) -> Result<Option<Tx>, PsbtError> {
        self.map.get(InputKey::NonWitnessUtxo).map(Tx::deserialize).transpose()
    }

    pub fn set_non_witness_utxo(&mut self, tx: &Tx) {
        self.map.set(InputKey::NonWitnessUtxo, encoded(tx))
    }

    pub fn witness_utxo(&self) -> Result<Option<TxOut>, PsbtError> {
        self.map.get(InputKey::WitnessUtxo).map(TxOut::deserialize).transpose()
    }

    pub fn set_witness_utxo(&mut self, utxo: &TxOut) {
        self.map.set(InputKey::WitnessUtxo, encoded(utxo))
    }

    pub fn partial_sig(&self, pubkey: &[u8]) -> Option<&ValueData> {
        self.map.get_keyed(InputKey::PartialSig, pubkey)
    }

    pub fn set_partial_sig(&mut self, pubkey: &[u8], sig: &[u8]) {
        self.map.set_keyed(InputKey::PartialSig, pubkey, ValueData::from(sig))
    }

    pub fn sighash_type(&self) -> Result<Option<u32>, PsbtError> {
        self.map.get(InputKey::SighashType).map(u32::deserialize).transpose()
    }

    pub fn set_sighash_type(&mut self, sighash_type: u32) {
        self.map.set(InputKey::SighashType, encoded(sighash_type))
    }

    pub fn redeem_script(&self) -> Option<&ValueData> { self.map.get(InputKey::RedeemScript) }

    pub fn set_redeem_script(&mut self, script: &[u8]) {
        self.map.set(InputKey::RedeemScript, ValueData::from(script))
    }

    pub fn witness_script(&self) -> Option<&ValueData> { self.map.get(InputKey::WitnessScript) }

    pub fn set_witness_script(&mut self, script: &[u8]) {
        self.map.set(InputKey::WitnessScript, ValueData::from(script))
    }

    pub fn bip32_derivation(&self, pubkey: &[u8]) -> Result<Option<KeyOrigin>, PsbtError> {
        self.map
            .get_keyed(InputKey::Bip32Derivation, pubkey)
            .map(KeyOrigin::deserialize)
            .transpose()
    }

    pub fn set_bip32_derivation(&mut self, pubkey: &[u8], origin: &KeyOrigin) {
        self.map.set_keyed(InputKey::Bip32Derivation, pubkey, encoded(origin))
    }

    pub fn final_script_sig(&self) -> Option<&ValueData> { self.map.get(InputKey::FinalScriptSig) }

    pub fn set_final_script_sig(&mut self, script_sig: &[u8]) {
        self.map.set(InputKey::FinalScriptSig, ValueData::from(script_sig))
    }

    /// Serialized final witness stack, stored as the raw consensus bytes.
    pub fn final_witness(&self) -> Option<&ValueData> { self.map.get(InputKey::FinalWitness) }

    pub fn set_final_witness(&mut self, witness: &[u8]) {
        self.map.set(InputKey::FinalWitness, ValueData::from(witness))
    }

    pub fn tap_key_sig(&self) -> Option<&ValueData> { self.map.get(InputKey::TapKeySig) }

    pub fn set_tap_key_sig(&mut self, sig: &[u8]) {
        self.map.set(InputKey::TapKeySig, ValueData::from(sig))
    }

    pub fn tap_script_sig(&self, pubkey: Bytes32, leaf_hash: Bytes32) -> Option<&ValueData> {
        self.map.get_keyed(InputKey::TapScriptSig, encoded((pubkey, leaf_hash)).as_ref())
    }

    pub fn set_tap_script_sig(&mut self, pubkey: Bytes32, leaf_hash: Bytes32, sig: &[u8]) {
        self.map.set_keyed(
            InputKey::TapScriptSig,
            encoded((pubkey, leaf_hash)).as_ref(),
            ValueData::from(sig),
        )
    }

    /// All taproot leaf scripts of the input, keyed by their raw control
    /// blocks, in serialized key order.
    pub fn tap_leaf_scripts(&self) -> Result<Vec<(KeyData, LeafScript)>, PsbtError> {
        self.map
            .entries_of(InputKey::TapLeafScript)
            .map(|(control_block, value)| {
                LeafScript::deserialize(value).map(|leaf| (KeyData::from(control_block), leaf))
            })
            .collect()
    }

    /// The first taproot leaf script of the input, if any.
    pub fn tap_leaf_script(&self) -> Result<Option<LeafScript>, PsbtError> {
        let Some((_, value)) = self.map.entries_of(InputKey::TapLeafScript).next() else {
            return Ok(None);
        };
        LeafScript::deserialize(value).map(Some)
    }

    pub fn set_tap_leaf_script(&mut self, control_block: &[u8], leaf: &LeafScript) {
        self.map.set_keyed(InputKey::TapLeafScript, control_block, encoded(leaf))
    }

    pub fn tap_derivations(&self) -> Result<Vec<(Bytes32, TapDerivation)>, PsbtError> {
        self.map
            .entries_of(InputKey::TapBip32Derivation)
            .map(|(key_data, value)| {
                let pubkey = Bytes32::deserialize(key_data)?;
                let derivation = TapDerivation::deserialize(value)?;
                Ok((pubkey, derivation))
            })
            .collect()
    }

    pub fn set_tap_derivation(&mut self, pubkey: Bytes32, derivation: &TapDerivation) {
        self.map.set_keyed(InputKey::TapBip32Derivation, pubkey.as_ref(), encoded(derivation))
    }
}

impl Output {
    fn new(index: usize) -> Self {
        Output {
            index,
            map: KeyedMap::new(),
        }
    }

    pub fn index(&self) -> usize { self.index }

    pub fn amount(&self) -> Result<Sats, PsbtError> {
        let value = u64::deserialize(self.map.require(OutputKey::Amount)?)?;
        if value > i64::MAX as u64 {
            return Err(PsbtError::AmountOverflow(value));
        }
        Ok(Sats(value))
    }

    pub fn set_amount(&mut self, amount: Sats) -> Result<(), PsbtError> {
        if amount.0 > i64::MAX as u64 {
            return Err(PsbtError::AmountOverflow(amount.0));
        }
        self.map.set(OutputKey::Amount, encoded(amount));
        Ok(())
    }

    pub fn script(&self) -> Result<ScriptPubkey, PsbtError> {
        let raw = self.map.require(OutputKey::Script)?;
        Ok(ScriptPubkey::from_unsafe(raw.to_vec()))
    }

    pub fn set_script(&mut self, script: &ScriptPubkey) {
        self.map.set(OutputKey::Script, ValueData::from(script.to_vec()))
    }

    pub fn redeem_script(&self) -> Option<&ValueData> { self.map.get(OutputKey::RedeemScript) }

    pub fn set_redeem_script(&mut self, script: &[u8]) {
        self.map.set(OutputKey::RedeemScript, ValueData::from(script))
    }

    pub fn witness_script(&self) -> Option<&ValueData> { self.map.get(OutputKey::WitnessScript) }

    pub fn set_witness_script(&mut self, script: &[u8]) {
        self.map.set(OutputKey::WitnessScript, ValueData::from(script))
    }

    pub fn bip32_derivation(&self, pubkey: &[u8]) -> Result<Option<KeyOrigin>, PsbtError> {
        self.map
            .get_keyed(OutputKey::Bip32Derivation, pubkey)
            .map(KeyOrigin::deserialize)
            .transpose()
    }

    pub fn set_bip32_derivation(&mut self, pubkey: &[u8], origin: &KeyOrigin) {
        self.map.set_keyed(OutputKey::Bip32Derivation, pubkey, encoded(origin))
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use derive::{DerivationIndex, DerivationPath, XpubFp};

    use super::*;
    use crate::MapName;

    fn raw_tx() -> Vec<u8> {
        let mut tx = vec![0x02, 0x00, 0x00, 0x00];
        tx.push(0x01);
        tx.extend_from_slice(&[0x33; 32]);
        tx.extend_from_slice(&[0x00; 4]);
        tx.push(0x00);
        tx.extend_from_slice(&[0xff; 4]);
        tx.push(0x01);
        tx.extend_from_slice(&50_000u64.to_le_bytes());
        tx.extend_from_slice(&[0x01, 0x51]);
        tx.extend_from_slice(&[0x00; 4]);
        tx
    }

    fn v0_fixture() -> Vec<u8> {
        let tx = raw_tx();
        let mut raw = b"psbt\xFF".to_vec();
        raw.push(0x01); // key len
        raw.push(0x00); // PSBT_GLOBAL_UNSIGNED_TX
        raw.push(tx.len() as u8);
        raw.extend_from_slice(&tx);
        raw.push(0x00); // global separator
        raw.push(0x00); // input separator
        raw.push(0x00); // output separator
        raw
    }

    #[test]
    fn invalid_magic() {
        let err = Psbt::deserialize(b"psbt\x00\x00").unwrap_err();
        assert!(matches!(err, PsbtError::InvalidMagic(_)));
    }

    #[test]
    fn trailing_garbage() {
        let mut raw = v0_fixture();
        raw.push(0xAA);
        assert_eq!(Psbt::deserialize(raw).unwrap_err(), PsbtError::DataNotConsumed);
    }

    #[test]
    fn v0_parse_comes_out_normalized() {
        let psbt = Psbt::deserialize(v0_fixture()).unwrap();
        assert_eq!(psbt.version().unwrap(), PsbtVer::V2);
        assert!(psbt.global.get(GlobalKey::UnsignedTx).is_none());
        assert_eq!(psbt.input_count().unwrap(), 1);
        assert_eq!(psbt.output_count().unwrap(), 1);
        assert_eq!(psbt.inputs().count(), 1);
        assert_eq!(psbt.outputs().count(), 1);
    }

    #[test]
    fn unsupported_version() {
        let mut raw = b"psbt\xFF".to_vec();
        raw.extend_from_slice(&[0x01, 0xFB, 0x04]);
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.push(0x00);
        assert_eq!(Psbt::deserialize(raw).unwrap_err(), PsbtError::UnsupportedVersion(1));
    }

    #[test]
    fn normalize_v0() {
        let mut psbt = Psbt::deserialize(v0_fixture()).unwrap();

        // zero locktime must not become a fallback entry
        assert_eq!(psbt.fallback_locktime().unwrap(), None);

        let input = psbt.input(0).unwrap();
        assert_eq!(input.previous_txid().unwrap(), Txid::deserialize([0x33; 32]).unwrap());
        assert_eq!(input.sequence().unwrap(), SeqNo::from_consensus_u32(0xffff_ffff));
        let output = psbt.output(0).unwrap();
        assert_eq!(output.amount().unwrap(), Sats(50_000));

        // repeated normalization must keep the document byte-stable
        let first = psbt.serialize();
        psbt.normalize().unwrap();
        assert_eq!(psbt.serialize(), first);
    }

    #[test]
    fn absent_sequence_defaults_to_final() {
        let mut psbt = Psbt::create();
        let input = psbt.push_input();
        assert_eq!(input.sequence().unwrap(), SeqNo::from_consensus_u32(0xffff_ffff));
    }

    #[test]
    fn serialization_is_deterministic() {
        let psbt = Psbt::deserialize(v0_fixture()).unwrap();
        let data = psbt.serialize();
        let restored = Psbt::deserialize(&data).unwrap();
        assert_eq!(restored.serialize(), data);
        assert_eq!(restored, psbt);
    }

    #[test]
    fn base64_roundtrip() {
        let psbt = Psbt::deserialize(v0_fixture()).unwrap();
        let b64 = psbt.to_string();
        let restored = Psbt::from_str(&b64).unwrap();
        assert_eq!(restored, psbt);
    }

    #[test]
    fn amount_overflow() {
        let mut psbt = Psbt::create();
        let output = psbt.push_output();
        let err = output.set_amount(Sats(u64::MAX)).unwrap_err();
        assert_eq!(err, PsbtError::AmountOverflow(u64::MAX));
    }

    #[test]
    fn typed_field_accessors() {
        let origin = KeyOrigin::new(
            XpubFp::from([0x64, 0x3a, 0x7a, 0xdc]),
            DerivationPath::from_iter([DerivationIndex::from_index(86)]),
        );
        let prev_tx = Tx::deserialize(raw_tx()).unwrap();

        let mut psbt = Psbt::create();
        psbt.set_xpub(&[0x07; 78], &origin);
        assert_eq!(psbt.xpub(&[0x07; 78]).unwrap(), Some(origin.clone()));
        assert_eq!(psbt.xpubs().count(), 1);

        let input = psbt.push_input();
        input.set_non_witness_utxo(&prev_tx);
        input.set_sighash_type(0x01);
        input.set_partial_sig(&[0x02; 33], &[0x30; 71]);
        input.set_redeem_script(&[0x51]);
        input.set_witness_script(&[0x52]);
        input.set_bip32_derivation(&[0x02; 33], &origin);
        input.set_final_script_sig(&[0x00]);
        input.set_final_witness(&[0x01, 0x01, 0xab]);

        assert_eq!(input.non_witness_utxo().unwrap(), Some(prev_tx));
        assert_eq!(input.sighash_type().unwrap(), Some(0x01));
        assert_eq!(input.partial_sig(&[0x02; 33]).unwrap().as_slice(), [0x30; 71]);
        assert_eq!(input.partial_sig(&[0x03; 33]), None);
        assert_eq!(input.redeem_script().unwrap().as_slice(), [0x51]);
        assert_eq!(input.witness_script().unwrap().as_slice(), [0x52]);
        assert_eq!(input.bip32_derivation(&[0x02; 33]).unwrap(), Some(origin.clone()));
        assert_eq!(input.final_script_sig().unwrap().as_slice(), [0x00]);
        assert_eq!(input.final_witness().unwrap().as_slice(), [0x01, 0x01, 0xab]);

        let output = psbt.push_output();
        output.set_redeem_script(&[0x53]);
        output.set_witness_script(&[0x54]);
        output.set_bip32_derivation(&[0x03; 33], &origin);
        assert_eq!(output.redeem_script().unwrap().as_slice(), [0x53]);
        assert_eq!(output.witness_script().unwrap().as_slice(), [0x54]);
        assert_eq!(output.bip32_derivation(&[0x03; 33]).unwrap(), Some(origin));
    }

    #[test]
    fn missing_required_global() {
        let mut psbt = Psbt::create();
        psbt.global.remove(GlobalKey::InputCount, &[]);
        assert_eq!(
            psbt.input_count().unwrap_err(),
            PsbtError::NoSuchEntry(MapName::Global, 0x04)
        );
    }
}
