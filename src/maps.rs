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

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::marker::PhantomData;

use amplify::IoError;

use crate::keys::KeyValue;
use crate::{Decode, DecodeError, Encode, KeyPair, KeyType, PropKey, PsbtError};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[display(lowercase)]
pub enum MapName {
    Global,
    Input,
    Output,
}

#[derive(Wrapper, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, From)]
#[wrapper(Deref, Index, RangeOps, AsSlice, BorrowSlice)]
pub struct KeyData(Vec<u8>);

impl From<&[u8]> for KeyData {
    fn from(data: &[u8]) -> Self { Self(data.to_vec()) }
}

impl KeyData {
    pub fn empty() -> Self { Self(vec![]) }
    pub fn into_vec(self) -> Vec<u8> { self.0 }
}

impl Encode for KeyData {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(&self.0)?;
        Ok(self.0.len())
    }
}

#[derive(Wrapper, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, From)]
#[wrapper(Deref, Index, RangeOps, AsSlice, BorrowSlice)]
pub struct ValueData(Vec<u8>);

impl From<&[u8]> for ValueData {
    fn from(data: &[u8]) -> Self { Self(data.to_vec()) }
}

impl ValueData {
    pub fn into_vec(self) -> Vec<u8> { self.0 }
}

impl Encode for ValueData {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(&self.0)?;
        Ok(self.0.len())
    }
}

/// Uniform storage of a single PSBT map.
///
/// Entries are kept under their serialized key, i.e. the field type byte
/// followed by the raw key data. Since the store is a B-tree, iteration and
/// thus serialization always happen in the lexicographic order of serialized
/// keys, making the wire image of any document deterministic. Unknown and
/// proprietary fields are ordinary entries and survive a parse-serialize
/// cycle byte-exactly.
///
/// Writes overwrite: the last value set under a key is the one kept, both in
/// the API and when a wire image repeats a key.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct KeyedMap<K: KeyType> {
    entries: BTreeMap<KeyData, ValueData>,
    _key_type: PhantomData<K>,
}

impl<K: KeyType> Default for KeyedMap<K> {
    fn default() -> Self { Self::new() }
}

impl<K: KeyType> KeyedMap<K> {
    pub fn new() -> Self {
        KeyedMap {
            entries: BTreeMap::new(),
            _key_type: PhantomData,
        }
    }

    fn raw_key(key_type: K, key_data: &[u8]) -> KeyData {
        let mut raw = Vec::with_capacity(1 + key_data.len());
        raw.push(key_type.to_u8());
        raw.extend_from_slice(key_data);
        KeyData::from(raw)
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Stores a value under a keyless field, replacing any previous value.
    pub fn set(&mut self, key_type: K, value: impl Into<ValueData>) {
        self.set_keyed(key_type, &[], value)
    }

    /// Stores a value under a field with key data, replacing any previous
    /// value under the same serialized key.
    pub fn set_keyed(&mut self, key_type: K, key_data: &[u8], value: impl Into<ValueData>) {
        self.entries.insert(Self::raw_key(key_type, key_data), value.into());
    }

    pub fn get(&self, key_type: K) -> Option<&ValueData> { self.get_keyed(key_type, &[]) }

    pub fn get_keyed(&self, key_type: K, key_data: &[u8]) -> Option<&ValueData> {
        self.entries.get(&Self::raw_key(key_type, key_data))
    }

    /// Returns the value of a keyless field which must be present.
    pub fn require(&self, key_type: K) -> Result<&ValueData, PsbtError> {
        self.get(key_type).ok_or(PsbtError::NoSuchEntry(K::MAP_NAME, key_type.to_u8()))
    }

    pub fn remove(&mut self, key_type: K, key_data: &[u8]) -> Option<ValueData> {
        self.entries.remove(&Self::raw_key(key_type, key_data))
    }

    /// Iterates over all entries of a given field type, yielding the raw key
    /// data (without the field type byte) alongside the value.
    pub fn entries_of(&self, key_type: K) -> impl Iterator<Item = (&[u8], &ValueData)> {
        let type_byte = key_type.to_u8();
        self.entries
            .range(KeyData::from(vec![type_byte])..)
            .take_while(move |(raw, _)| raw.first() == Some(&type_byte))
            .map(|(raw, value)| (&raw[1..], value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyData, &ValueData)> { self.entries.iter() }

    pub fn set_proprietary(&mut self, key: &PropKey, value: impl Into<ValueData>) {
        self.set_keyed(K::from_u8(0xFC), &Self::prop_key_data(key), value)
    }

    pub fn proprietary(&self, key: &PropKey) -> Option<&ValueData> {
        self.get_keyed(K::from_u8(0xFC), &Self::prop_key_data(key))
    }

    fn prop_key_data(key: &PropKey) -> Vec<u8> {
        let mut data = Vec::new();
        key.encode(&mut data).expect("in-memory encoding can't error");
        data
    }
}

impl<K: KeyType> Encode for KeyedMap<K> {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = 0;
        for (raw, value) in &self.entries {
            let key_type = K::from_u8(raw[0]);
            let key_data = KeyData::from(&raw[1..]);
            counter += KeyPair::new(key_type, key_data, value).encode(writer)?;
        }
        counter += 0u8.encode(writer)?;
        Ok(counter)
    }
}

impl<K: KeyType> Decode for KeyedMap<K> {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut me = KeyedMap::new();
        loop {
            match KeyValue::<K>::decode(reader)? {
                KeyValue::Separator => return Ok(me),
                KeyValue::Pair(pair) => {
                    me.set_keyed(pair.key_type, pair.key_data.as_ref(), pair.value_data);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::InputKey;

    #[test]
    fn serialized_key_ordering() {
        let mut map = KeyedMap::<InputKey>::new();
        map.set_keyed(InputKey::TapScriptSig, &[0xff; 4], vec![1u8]);
        map.set(InputKey::Sequence, vec![0xff, 0xff, 0xff, 0xff]);
        map.set(InputKey::PreviousTxid, vec![0u8; 32]);

        let mut data = Vec::new();
        map.encode(&mut data).unwrap();
        // 0x0e before 0x10 before 0x14, separator last
        assert_eq!(data[1], 0x0e);
        // first entry takes 35 bytes: key len, type, value len, 32-byte txid
        assert_eq!(data[36], 0x10);
        assert_eq!(*data.last().unwrap(), 0x00);
    }

    #[test]
    fn last_write_wins() {
        let mut map = KeyedMap::<InputKey>::new();
        map.set(InputKey::Sequence, vec![1u8, 0, 0, 0]);
        map.set(InputKey::Sequence, vec![2u8, 0, 0, 0]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(InputKey::Sequence).unwrap().as_slice(), [2u8, 0, 0, 0]);
    }

    #[test]
    fn missing_required_field() {
        let map = KeyedMap::<InputKey>::new();
        let err = map.require(InputKey::PreviousTxid).unwrap_err();
        assert_eq!(err, PsbtError::NoSuchEntry(MapName::Input, 0x0e));
        assert_eq!(err.to_string(), "input map misses required field 0x0e.");
    }

    #[test]
    fn map_roundtrip() {
        let mut map = KeyedMap::<InputKey>::new();
        map.set(InputKey::Unknown(0xA7), vec![0xde, 0xad]);
        map.set_keyed(InputKey::TapScriptSig, &[3u8; 64], vec![0u8; 64]);
        map.set(InputKey::Sequence, vec![0xfe, 0xff, 0xff, 0xff]);

        let mut data = Vec::new();
        map.encode(&mut data).unwrap();
        let restored = KeyedMap::<InputKey>::deserialize(&data).unwrap();
        assert_eq!(map, restored);

        let mut data2 = Vec::new();
        restored.encode(&mut data2).unwrap();
        assert_eq!(data, data2);
    }

    #[test]
    fn empty_map_is_separator() {
        let map = KeyedMap::<InputKey>::new();
        let mut data = Vec::new();
        map.encode(&mut data).unwrap();
        assert_eq!(data, vec![0x00]);
    }
}
