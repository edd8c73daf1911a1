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

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod coders;
mod keys;
mod maps;
mod data;
mod psbt;
mod script;
mod policy;
mod recognize;
mod sign;

pub use coders::{Decode, DecodeError, Encode, PsbtError, PsbtParseError};
pub use data::{LeafScript, TapDerivation, UnsignedTx, UnsignedTxIn};
pub use keys::{GlobalKey, InputKey, KeyPair, KeyType, KeyValue, OutputKey, PropKey};
pub use maps::{KeyData, KeyedMap, MapName, ValueData};
pub use policy::{
    LeafHashMode, PolicyError, SlashingParams, StakingAccount, SyntheticXpub, TimelockParams,
    UnbondingParams, WalletPolicy, XPUB_MAINNET_MAGIC, XPUB_TESTNET_MAGIC,
};
pub use psbt::{Input, Output, Psbt, PsbtVer};
pub use recognize::{classify_script, recognize_policy, StakingScript};
pub use script::{decode_script, tap_leaf_hash, ScriptToken};
pub use sign::{DeviceFailure, InputSignature, SignError, SigningDevice};
