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

use amplify::Bytes32;

use crate::script::{
    tap_leaf_hash, OP_CHECKSEQUENCEVERIFY, OP_CHECKSIG, OP_CHECKSIGADD, OP_CHECKSIGVERIFY,
    OP_NUMEQUAL,
};
use crate::{
    decode_script, LeafHashMode, PolicyError, Psbt, ScriptToken, SigningDevice, SlashingParams,
    StakingAccount, TimelockParams, UnbondingParams, WalletPolicy,
};

/// A recognized staking leaf script with the key material read out of it.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum StakingScript {
    /// Staker and finality provider co-sign with a covenant committee
    /// threshold.
    Slashing {
        finality_provider: Bytes32,
        covenant_threshold: u8,
        covenant_keys: Vec<Bytes32>,
    },
    /// Staker exits early, countersigned by a covenant committee threshold.
    Unbonding {
        covenant_threshold: u8,
        covenant_keys: Vec<Bytes32>,
    },
    /// Staker withdraws alone after a relative block timelock.
    Timelock { blocks: u32 },
}

fn key32(token: &ScriptToken) -> Option<Bytes32> {
    let data = token.data()?;
    if data.len() != 32 {
        return None;
    }
    let mut buf = [0u8; 32];
    buf.copy_from_slice(data);
    Some(Bytes32::from(buf))
}

/// Reads a minimally-encoded script number: a small-number opcode, or a
/// little-endian data push of up to 4 bytes without a sign bit, redundant
/// zero bytes rejected.
fn script_num(token: &ScriptToken) -> Option<u32> {
    if let Some(n) = token.small_num() {
        return Some(n as u32);
    }
    let data = token.data()?;
    if data.is_empty() || data.len() > 4 {
        return None;
    }
    let last = *data.last()?;
    if last & 0x80 != 0 {
        return None;
    }
    if last == 0 && (data.len() == 1 || data[data.len() - 2] & 0x80 == 0) {
        return None;
    }
    let mut value = 0u32;
    for (pos, byte) in data.iter().enumerate() {
        value |= (*byte as u32) << (8 * pos);
    }
    Some(value)
}

/// Matches `<pk> OP_CHECKSIG (<pk> OP_CHECKSIGADD)* <T> OP_NUMEQUAL`.
fn parse_committee(tokens: &[ScriptToken]) -> Option<(u8, Vec<Bytes32>)> {
    let len = tokens.len();
    if len < 4 || len % 2 != 0 {
        return None;
    }
    if !matches!(tokens[len - 1], ScriptToken::Op(OP_NUMEQUAL)) {
        return None;
    }
    let threshold = script_num(&tokens[len - 2])?;

    let mut keys = Vec::with_capacity((len - 2) / 2);
    for pair in tokens[..len - 2].chunks(2) {
        let key = key32(&pair[0])?;
        let expected = if keys.is_empty() { OP_CHECKSIG } else { OP_CHECKSIGADD };
        if !matches!(pair[1], ScriptToken::Op(op) if op == expected) {
            return None;
        }
        keys.push(key);
    }
    if threshold == 0 || threshold > keys.len() as u32 {
        return None;
    }
    Some((threshold as u8, keys))
}

fn match_slashing(tokens: &[ScriptToken]) -> Option<StakingScript> {
    if tokens.len() < 8 {
        return None;
    }
    key32(&tokens[0])?;
    if !matches!(tokens[1], ScriptToken::Op(OP_CHECKSIGVERIFY)) {
        return None;
    }
    let finality_provider = key32(&tokens[2])?;
    if !matches!(tokens[3], ScriptToken::Op(OP_CHECKSIGVERIFY)) {
        return None;
    }
    let (covenant_threshold, covenant_keys) = parse_committee(&tokens[4..])?;
    Some(StakingScript::Slashing {
        finality_provider,
        covenant_threshold,
        covenant_keys,
    })
}

fn match_unbonding(tokens: &[ScriptToken]) -> Option<StakingScript> {
    if tokens.len() < 6 {
        return None;
    }
    key32(&tokens[0])?;
    if !matches!(tokens[1], ScriptToken::Op(OP_CHECKSIGVERIFY)) {
        return None;
    }
    let (covenant_threshold, covenant_keys) = parse_committee(&tokens[2..])?;
    Some(StakingScript::Unbonding {
        covenant_threshold,
        covenant_keys,
    })
}

fn match_timelock(tokens: &[ScriptToken]) -> Option<StakingScript> {
    if tokens.len() != 4 {
        return None;
    }
    key32(&tokens[0])?;
    if !matches!(tokens[1], ScriptToken::Op(OP_CHECKSIGVERIFY)) {
        return None;
    }
    let blocks = script_num(&tokens[2])?;
    if !matches!(tokens[3], ScriptToken::Op(OP_CHECKSEQUENCEVERIFY)) {
        return None;
    }
    Some(StakingScript::Timelock { blocks })
}

/// Tries the staking script patterns in order of decreasing specificity:
/// slashing consent, then unbonding, then timelock withdrawal. A script
/// matching none of them yields `None`.
pub fn classify_script(tokens: &[ScriptToken]) -> Option<StakingScript> {
    match_slashing(tokens)
        .or_else(|| match_unbonding(tokens))
        .or_else(|| match_timelock(tokens))
}

/// Derives the wallet policy a device must register to sign this PSBT.
///
/// With no taproot leaf script on any input the transaction is a key-path
/// spend and the deposit policy applies. Otherwise the first leaf script is
/// classified; an unrecognized script returns `Ok(None)` so the caller can
/// fall back to manual review. The leaf hash key of a script-path policy is
/// computed from the leaf script, unless `leaf_hash` overrides it.
pub fn recognize_policy(
    device: &mut impl SigningDevice,
    psbt: &Psbt,
    testnet: bool,
    leaf_hash: Option<Bytes32>,
    mode: LeafHashMode,
) -> Result<Option<WalletPolicy>, PolicyError> {
    let account = StakingAccount::with(device, None, testnet)?;

    let mut leaf = None;
    for input in psbt.inputs() {
        if let Some(found) = input.tap_leaf_script()? {
            leaf = Some(found);
            break;
        }
    }
    let Some(leaf) = leaf else {
        return Ok(Some(account.deposit_policy()));
    };

    let tokens = decode_script(leaf.script.as_slice())?;
    let Some(script) = classify_script(&tokens) else {
        return Ok(None);
    };
    let leaf_hash = leaf_hash.unwrap_or_else(|| tap_leaf_hash(leaf.script.as_slice()));

    let policy = match script {
        StakingScript::Slashing {
            finality_provider,
            covenant_threshold,
            covenant_keys,
        } => account.slashing_policy(
            &SlashingParams {
                leaf_hash,
                finality_provider,
                covenant_threshold,
                covenant_keys,
            },
            mode,
        )?,
        StakingScript::Unbonding {
            covenant_threshold,
            covenant_keys,
        } => account.unbonding_policy(
            &UnbondingParams {
                leaf_hash,
                covenant_threshold,
                covenant_keys,
            },
            mode,
        )?,
        StakingScript::Timelock { blocks } => account.timelock_policy(
            &TimelockParams {
                leaf_hash,
                timelock_blocks: blocks,
            },
            mode,
        )?,
    };
    Ok(Some(policy))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::script::{OP_1, OP_16};
    use crate::sign::test_device::TestDevice;
    use crate::LeafScript;
    use bc::TapScript;

    fn push32(script: &mut Vec<u8>, byte: u8) {
        script.push(0x20);
        script.extend_from_slice(&[byte; 32]);
    }

    fn slashing_script() -> Vec<u8> {
        let mut script = Vec::new();
        push32(&mut script, 0x01); // staker
        script.push(OP_CHECKSIGVERIFY);
        push32(&mut script, 0x02); // finality provider
        script.push(OP_CHECKSIGVERIFY);
        push32(&mut script, 0x03);
        script.push(OP_CHECKSIG);
        push32(&mut script, 0x04);
        script.push(OP_CHECKSIGADD);
        push32(&mut script, 0x05);
        script.push(OP_CHECKSIGADD);
        script.push(OP_1 + 1); // OP_2
        script.push(OP_NUMEQUAL);
        script
    }

    fn unbonding_script() -> Vec<u8> {
        let mut script = Vec::new();
        push32(&mut script, 0x01);
        script.push(OP_CHECKSIGVERIFY);
        push32(&mut script, 0x03);
        script.push(OP_CHECKSIG);
        push32(&mut script, 0x04);
        script.push(OP_CHECKSIGADD);
        script.push(OP_1);
        script.push(OP_NUMEQUAL);
        script
    }

    fn timelock_script() -> Vec<u8> {
        let mut script = Vec::new();
        push32(&mut script, 0x01);
        script.push(OP_CHECKSIGVERIFY);
        script.extend_from_slice(&[0x02, 0xe8, 0x03]);
        script.push(OP_CHECKSEQUENCEVERIFY);
        script
    }

    #[test]
    fn classify_slashing() {
        let tokens = decode_script(&slashing_script()).unwrap();
        let script = classify_script(&tokens).unwrap();
        assert_eq!(script, StakingScript::Slashing {
            finality_provider: Bytes32::from([0x02; 32]),
            covenant_threshold: 2,
            covenant_keys: vec![
                Bytes32::from([0x03; 32]),
                Bytes32::from([0x04; 32]),
                Bytes32::from([0x05; 32]),
            ],
        });
    }

    #[test]
    fn classify_unbonding() {
        let tokens = decode_script(&unbonding_script()).unwrap();
        let script = classify_script(&tokens).unwrap();
        assert_eq!(script, StakingScript::Unbonding {
            covenant_threshold: 1,
            covenant_keys: vec![Bytes32::from([0x03; 32]), Bytes32::from([0x04; 32])],
        });
    }

    #[test]
    fn classify_timelock_le_number() {
        let tokens = decode_script(&timelock_script()).unwrap();
        assert_eq!(classify_script(&tokens), Some(StakingScript::Timelock { blocks: 1000 }));
    }

    #[test]
    fn classify_rejects_foreign_scripts() {
        // pay-to-pubkey style tapscript
        let mut script = Vec::new();
        push32(&mut script, 0x01);
        script.push(OP_CHECKSIG);
        let tokens = decode_script(&script).unwrap();
        assert_eq!(classify_script(&tokens), None);

        // broken committee: threshold above the committee size
        let mut script = Vec::new();
        push32(&mut script, 0x01);
        script.push(OP_CHECKSIGVERIFY);
        push32(&mut script, 0x03);
        script.push(OP_CHECKSIG);
        push32(&mut script, 0x04);
        script.push(OP_CHECKSIGADD);
        script.push(OP_16);
        script.push(OP_NUMEQUAL);
        let tokens = decode_script(&script).unwrap();
        assert_eq!(classify_script(&tokens), None);
    }

    #[test]
    fn script_num_minimality() {
        assert_eq!(script_num(&ScriptToken::Data(vec![0xe8, 0x03])), Some(1000));
        assert_eq!(script_num(&ScriptToken::Data(vec![0x7f])), Some(127));
        // sign bit set
        assert_eq!(script_num(&ScriptToken::Data(vec![0x80])), None);
        // redundant trailing zero
        assert_eq!(script_num(&ScriptToken::Data(vec![0x01, 0x00])), None);
        // zero must be OP_0
        assert_eq!(script_num(&ScriptToken::Data(vec![0x00])), None);
        assert_eq!(script_num(&ScriptToken::Op(OP_1)), Some(1));
    }

    #[test]
    fn recognize_deposit_without_leaf_scripts() {
        let mut device = TestDevice::default();
        let mut psbt = Psbt::create();
        psbt.push_input();
        let policy = recognize_policy(&mut device, &psbt, true, None, LeafHashMode::Display)
            .unwrap()
            .unwrap();
        assert_eq!(policy.name, "Staking Deposit");
        assert_eq!(policy.descriptor_template, "tr(@0/**)");
    }

    #[test]
    fn recognize_timelock_leaf() {
        let mut device = TestDevice::default();
        let mut psbt = Psbt::create();
        let input = psbt.push_input();
        let leaf = LeafScript::tap_script(TapScript::from_unsafe(timelock_script()));
        input.set_tap_leaf_script(&[0xc0; 33], &leaf);

        let policy = recognize_policy(&mut device, &psbt, true, None, LeafHashMode::Verify)
            .unwrap()
            .unwrap();
        assert_eq!(policy.name, "Withdraw");
        assert_eq!(policy.descriptor_template, "tr(@0/**,and_v(pk_k(@1/**),older(1000)))");
        // leaf hash key carries the verification magic fingerprint
        assert!(policy.keys[0].starts_with("[fffffffd]tpub"));

        // the display mode is forwarded to non-slashing paths as well
        let shown = recognize_policy(&mut device, &psbt, true, None, LeafHashMode::Display)
            .unwrap()
            .unwrap();
        assert!(shown.keys[0].starts_with("[fffffffe]tpub"));
    }

    #[test]
    fn recognize_unknown_leaf() {
        let mut device = TestDevice::default();
        let mut psbt = Psbt::create();
        let input = psbt.push_input();
        let mut script = Vec::new();
        push32(&mut script, 0x01);
        script.push(OP_CHECKSIG);
        let leaf = LeafScript::tap_script(TapScript::from_unsafe(script));
        input.set_tap_leaf_script(&[0xc0; 33], &leaf);

        let policy =
            recognize_policy(&mut device, &psbt, true, None, LeafHashMode::Display).unwrap();
        assert_eq!(policy, None);
    }

    #[test]
    fn leaf_hash_override() {
        let mut device = TestDevice::default();
        let mut psbt = Psbt::create();
        let input = psbt.push_input();
        let leaf = LeafScript::tap_script(TapScript::from_unsafe(timelock_script()));
        input.set_tap_leaf_script(&[0xc0; 33], &leaf);

        let computed = recognize_policy(&mut device, &psbt, true, None, LeafHashMode::Verify)
            .unwrap()
            .unwrap();
        let overridden = recognize_policy(
            &mut device,
            &psbt,
            true,
            Some(Bytes32::from([0xAB; 32])),
            LeafHashMode::Verify,
        )
        .unwrap()
        .unwrap();
        assert_ne!(computed.keys[0], overridden.keys[0]);
        assert_eq!(computed.keys[1], overridden.keys[1]);
    }
}
