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
use bitcoin_hashes::{sha256, Hash};
use derive::{DerivationPath, HardenedIndex, XpubFp};
use invoice::base58;

use crate::{DeviceFailure, PsbtError, SigningDevice};

pub const XPUB_MAINNET_MAGIC: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];
pub const XPUB_TESTNET_MAGIC: [u8; 4] = [0x04, 0x35, 0x87, 0xCF];

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PolicyError {
    /// device has failed. {0}
    #[from]
    Device(DeviceFailure),

    /// invalid PSBT. {0}
    #[from]
    Psbt(PsbtError),

    /// public key has invalid length of {0} bytes.
    InvalidKeyLength(usize),

    /// covenant committee threshold can't be zero.
    ZeroThreshold,

    /// covenant committee can't be empty.
    EmptyCommittee,

    /// covenant threshold {0} exceeds the committee size of {1} keys.
    ExcessiveThreshold(u8, usize),
}

/// Magic master fingerprints marking the first policy key as a leaf hash
/// carrier rather than a real extended key. Display is put on policies meant
/// for showing an address on the device screen; verification policies use the
/// second value so that the two can never be confused for one another.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum LeafHashMode {
    #[display("fffffffe")]
    Display,

    #[display("fffffffd")]
    Verify,
}

/// An extended public key synthesized from a bare public key, so that keys
/// with no derivation behind them (covenant members, finality providers, leaf
/// hash carriers) fit the xpub-only slots of a wallet policy.
///
/// Depth, parent fingerprint and child number are zero; the chain code is the
/// SHA-256 of the raw key bytes, which keeps the construction deterministic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SyntheticXpub {
    testnet: bool,
    chain_code: Bytes32,
    key: [u8; 33],
}

impl SyntheticXpub {
    /// Wraps raw key bytes: a 32-byte x-only key gets an even-parity 0x02
    /// prefix, a 33-byte compressed key is taken as is.
    pub fn with(raw: &[u8], testnet: bool) -> Result<Self, PolicyError> {
        let mut key = [0u8; 33];
        match raw.len() {
            32 => {
                key[0] = 0x02;
                key[1..].copy_from_slice(raw);
            }
            33 => key.copy_from_slice(raw),
            wrong => return Err(PolicyError::InvalidKeyLength(wrong)),
        }
        let chain_code = Bytes32::from(*sha256::Hash::hash(raw).as_byte_array());
        Ok(SyntheticXpub {
            testnet,
            chain_code,
            key,
        })
    }

    pub fn encode(&self) -> [u8; 78] {
        let mut buf = [0u8; 78];
        buf[..4].copy_from_slice(if self.testnet {
            &XPUB_TESTNET_MAGIC
        } else {
            &XPUB_MAINNET_MAGIC
        });
        // depth, parent fingerprint and child number stay zero
        buf[13..45].copy_from_slice(self.chain_code.as_ref());
        buf[45..].copy_from_slice(&self.key);
        buf
    }
}

impl Display for SyntheticXpub {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        base58::encode_check_to_fmt(f, &self.encode())
    }
}

/// A Ledger-style wallet policy: a named miniscript-like template whose `@N`
/// placeholders index into the key information vector.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct WalletPolicy {
    pub name: String,
    pub descriptor_template: String,
    pub keys: Vec<String>,
}

/// Parameters of the slashing consent path: the staker key together with the
/// finality provider key and a threshold of the covenant committee.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SlashingParams {
    pub leaf_hash: Bytes32,
    pub finality_provider: Bytes32,
    pub covenant_threshold: u8,
    pub covenant_keys: Vec<Bytes32>,
}

/// Parameters of the unbonding path: early exit countersigned by a threshold
/// of the covenant committee.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct UnbondingParams {
    pub leaf_hash: Bytes32,
    pub covenant_threshold: u8,
    pub covenant_keys: Vec<Bytes32>,
}

/// Parameters of the timelock withdrawal path.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TimelockParams {
    pub leaf_hash: Bytes32,
    pub timelock_blocks: u32,
}

fn check_committee(threshold: u8, keys: &[Bytes32]) -> Result<(), PolicyError> {
    if threshold == 0 {
        return Err(PolicyError::ZeroThreshold);
    }
    if keys.is_empty() {
        return Err(PolicyError::EmptyCommittee);
    }
    if (threshold as usize) > keys.len() {
        return Err(PolicyError::ExcessiveThreshold(threshold, keys.len()));
    }
    Ok(())
}

fn multi_a(threshold: u8, first_slot: usize, count: usize) -> String {
    let mut expr = format!("multi_a({threshold}");
    for slot in first_slot..first_slot + count {
        expr.push_str(&format!(",@{slot}/**"));
    }
    expr.push(')');
    expr
}

/// The staking account of a signing device: its master fingerprint and the
/// account-level extended public key under a BIP-86 derivation. Produces the
/// wallet policies for each staking path.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct StakingAccount {
    master_fp: XpubFp,
    derivation: DerivationPath<HardenedIndex>,
    xpub: String,
    testnet: bool,
}

impl StakingAccount {
    /// Reads the master fingerprint and the account xpub from the device. If
    /// no derivation path is given, `m/86'/0'/0'` is used on mainnet and
    /// `m/86'/1'/0'` on testnet.
    pub fn with(
        device: &mut impl SigningDevice,
        path: Option<DerivationPath<HardenedIndex>>,
        testnet: bool,
    ) -> Result<Self, PolicyError> {
        let derivation = path.unwrap_or_else(|| Self::default_derivation(testnet));
        let master_fp = device.master_fingerprint()?;
        let xpub = device.extended_pubkey(&derivation)?;
        Ok(StakingAccount {
            master_fp,
            derivation,
            xpub,
            testnet,
        })
    }

    pub fn default_derivation(testnet: bool) -> DerivationPath<HardenedIndex> {
        let coin = if testnet { 1 } else { 0 };
        DerivationPath::from_iter([
            HardenedIndex::hardened(86),
            HardenedIndex::hardened(coin),
            HardenedIndex::hardened(0),
        ])
    }

    pub fn master_fp(&self) -> XpubFp { self.master_fp }

    pub fn derivation(&self) -> &DerivationPath<HardenedIndex> { &self.derivation }

    pub fn is_testnet(&self) -> bool { self.testnet }

    /// Key information string of the device key, origin included.
    pub fn origin_key(&self) -> String {
        format!("[{}{:#}]{}", self.master_fp, self.derivation, self.xpub)
    }

    fn leaf_hash_key(&self, leaf_hash: Bytes32, mode: LeafHashMode) -> Result<String, PolicyError> {
        let xpub = SyntheticXpub::with(leaf_hash.as_ref(), self.testnet)?;
        Ok(format!("[{mode}]{xpub}"))
    }

    /// Key-path-only policy for receiving a staking deposit.
    pub fn deposit_policy(&self) -> WalletPolicy {
        WalletPolicy {
            name: "Staking Deposit".to_owned(),
            descriptor_template: "tr(@0/**)".to_owned(),
            keys: vec![self.origin_key()],
        }
    }

    /// Script-path policy consenting to slashing: the staker and the finality
    /// provider sign together with a covenant committee threshold.
    pub fn slashing_policy(
        &self,
        params: &SlashingParams,
        mode: LeafHashMode,
    ) -> Result<WalletPolicy, PolicyError> {
        check_committee(params.covenant_threshold, &params.covenant_keys)?;

        let mut keys = vec![
            self.leaf_hash_key(params.leaf_hash, mode)?,
            self.origin_key(),
            SyntheticXpub::with(params.finality_provider.as_ref(), self.testnet)?.to_string(),
        ];
        for key in &params.covenant_keys {
            keys.push(SyntheticXpub::with(key.as_ref(), self.testnet)?.to_string());
        }

        let committee = multi_a(params.covenant_threshold, 3, params.covenant_keys.len());
        Ok(WalletPolicy {
            name: "Consent to slashing".to_owned(),
            descriptor_template: format!(
                "tr(@0/**,and_v(pk_k(@1/**),and_v(pk_k(@2/**),{committee})))"
            ),
            keys,
        })
    }

    /// Script-path policy for unbonding before the timelock expires.
    pub fn unbonding_policy(
        &self,
        params: &UnbondingParams,
        mode: LeafHashMode,
    ) -> Result<WalletPolicy, PolicyError> {
        check_committee(params.covenant_threshold, &params.covenant_keys)?;

        let mut keys = vec![self.leaf_hash_key(params.leaf_hash, mode)?, self.origin_key()];
        for key in &params.covenant_keys {
            keys.push(SyntheticXpub::with(key.as_ref(), self.testnet)?.to_string());
        }

        let committee = multi_a(params.covenant_threshold, 2, params.covenant_keys.len());
        Ok(WalletPolicy {
            name: "Unbonding".to_owned(),
            descriptor_template: format!("tr(@0/**,and_v(pk_k(@1/**),{committee}))"),
            keys,
        })
    }

    /// Script-path policy withdrawing the stake after the relative timelock.
    /// The block count goes into the template verbatim, with no range
    /// restriction.
    pub fn timelock_policy(
        &self,
        params: &TimelockParams,
        mode: LeafHashMode,
    ) -> Result<WalletPolicy, PolicyError> {
        let keys = vec![self.leaf_hash_key(params.leaf_hash, mode)?, self.origin_key()];
        Ok(WalletPolicy {
            name: "Withdraw".to_owned(),
            descriptor_template: format!(
                "tr(@0/**,and_v(pk_k(@1/**),older({})))",
                params.timelock_blocks
            ),
            keys,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sign::test_device::TestDevice;

    fn account() -> StakingAccount {
        StakingAccount::with(&mut TestDevice::default(), None, true).unwrap()
    }

    #[test]
    fn default_derivation_paths() {
        assert_eq!(StakingAccount::default_derivation(false).to_string(), "/86h/0h/0h");
        assert_eq!(StakingAccount::default_derivation(true).to_string(), "/86h/1h/0h");
    }

    #[test]
    fn deposit_template() {
        let policy = account().deposit_policy();
        assert_eq!(policy.name, "Staking Deposit");
        assert_eq!(policy.descriptor_template, "tr(@0/**)");
        assert_eq!(policy.keys.len(), 1);
        assert!(policy.keys[0].starts_with("[643a7adc/86'/1'/0']tpub"));
    }

    #[test]
    fn slashing_template() {
        let params = SlashingParams {
            leaf_hash: Bytes32::from([0x11; 32]),
            finality_provider: Bytes32::from([0x22; 32]),
            covenant_threshold: 2,
            covenant_keys: vec![
                Bytes32::from([0x33; 32]),
                Bytes32::from([0x44; 32]),
                Bytes32::from([0x55; 32]),
            ],
        };
        let policy = account().slashing_policy(&params, LeafHashMode::Display).unwrap();
        assert_eq!(policy.name, "Consent to slashing");
        assert_eq!(
            policy.descriptor_template,
            "tr(@0/**,and_v(pk_k(@1/**),and_v(pk_k(@2/**),multi_a(2,@3/**,@4/**,@5/**))))"
        );
        assert_eq!(policy.keys.len(), 6);
        assert!(policy.keys[0].starts_with("[fffffffe]tpub"));
        assert!(policy.keys[1].starts_with("[643a7adc/86'/1'/0']"));
        assert!(policy.keys[2].starts_with("tpub"));
    }

    #[test]
    fn unbonding_template() {
        let params = UnbondingParams {
            leaf_hash: Bytes32::from([0x11; 32]),
            covenant_threshold: 1,
            covenant_keys: vec![Bytes32::from([0x33; 32]), Bytes32::from([0x44; 32])],
        };
        let account = account();
        let policy = account.unbonding_policy(&params, LeafHashMode::Verify).unwrap();
        assert_eq!(policy.name, "Unbonding");
        assert_eq!(
            policy.descriptor_template,
            "tr(@0/**,and_v(pk_k(@1/**),multi_a(1,@2/**,@3/**)))"
        );
        assert_eq!(policy.keys.len(), 4);
        assert!(policy.keys[0].starts_with("[fffffffd]tpub"));

        let shown = account.unbonding_policy(&params, LeafHashMode::Display).unwrap();
        assert!(shown.keys[0].starts_with("[fffffffe]tpub"));
    }

    #[test]
    fn timelock_template() {
        let mut params = TimelockParams {
            leaf_hash: Bytes32::from([0x11; 32]),
            timelock_blocks: 1000,
        };
        let account = account();
        let policy = account.timelock_policy(&params, LeafHashMode::Verify).unwrap();
        assert_eq!(policy.name, "Withdraw");
        assert_eq!(policy.descriptor_template, "tr(@0/**,and_v(pk_k(@1/**),older(1000)))");
        assert_eq!(policy.keys.len(), 2);
        assert!(policy.keys[0].starts_with("[fffffffd]tpub"));

        // the raw block count is not range-restricted
        params.timelock_blocks = 70_000;
        let policy = account.timelock_policy(&params, LeafHashMode::Display).unwrap();
        assert_eq!(policy.descriptor_template, "tr(@0/**,and_v(pk_k(@1/**),older(70000)))");
        assert!(policy.keys[0].starts_with("[fffffffe]tpub"));
    }

    #[test]
    fn committee_validation() {
        let account = account();
        let mut params = UnbondingParams {
            leaf_hash: Bytes32::from([0u8; 32]),
            covenant_threshold: 0,
            covenant_keys: vec![Bytes32::from([0x33; 32])],
        };
        assert_eq!(
            account.unbonding_policy(&params, LeafHashMode::Verify).unwrap_err(),
            PolicyError::ZeroThreshold
        );

        params.covenant_threshold = 1;
        params.covenant_keys = vec![];
        assert_eq!(
            account.unbonding_policy(&params, LeafHashMode::Verify).unwrap_err(),
            PolicyError::EmptyCommittee
        );

        params.covenant_threshold = 3;
        params.covenant_keys = vec![Bytes32::from([0x33; 32]), Bytes32::from([0x44; 32])];
        assert_eq!(
            account.unbonding_policy(&params, LeafHashMode::Verify).unwrap_err(),
            PolicyError::ExcessiveThreshold(3, 2)
        );
    }

    #[test]
    fn synthetic_xpub_key_lengths() {
        assert!(SyntheticXpub::with(&[0x02; 33], false).is_ok());
        assert!(SyntheticXpub::with(&[0x11; 32], true).is_ok());
        assert_eq!(
            SyntheticXpub::with(&[0x11; 31], true).unwrap_err(),
            PolicyError::InvalidKeyLength(31)
        );
    }

    #[test]
    fn synthetic_xpub_network_prefix() {
        let mainnet = SyntheticXpub::with(&[0x11; 32], false).unwrap().to_string();
        let testnet = SyntheticXpub::with(&[0x11; 32], true).unwrap().to_string();
        assert!(mainnet.starts_with("xpub"), "{mainnet}");
        assert!(testnet.starts_with("tpub"), "{testnet}");
    }
}
