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
use derive::{DerivationPath, HardenedIndex, XpubFp};

use crate::script::tap_leaf_hash;
use crate::{Psbt, PsbtError, WalletPolicy};

/// An error reported by a hardware signing device.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum DeviceFailure {
    /// device is not connected or has stopped responding.
    Unresponsive,

    /// user has rejected the operation on the device.
    Rejected,

    /// device has returned an error: {0}
    Failure(String),
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SignError {
    /// device has failed. {0}
    #[from]
    Device(DeviceFailure),

    /// invalid PSBT. {0}
    #[from]
    Psbt(PsbtError),

    /// device has signed a non-existing input {0}.
    InputOutOfRange(usize),

    /// device has returned a {0}-byte public key unusable for a taproot
    /// spend.
    InvalidPubkey(usize),
}

/// A signature produced by a device for a single input.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct InputSignature {
    pub input_index: usize,
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
    pub leaf_hash: Option<Bytes32>,
}

/// Abstraction over a hardware signing device.
///
/// The device speaks base64 PSBT and wallet policies; everything else about
/// its transport is up to the implementation.
pub trait SigningDevice {
    fn master_fingerprint(&mut self) -> Result<XpubFp, DeviceFailure>;

    /// Extended public key at a hardened derivation path, base58-encoded.
    fn extended_pubkey(
        &mut self,
        path: &DerivationPath<HardenedIndex>,
    ) -> Result<String, DeviceFailure>;

    /// Signs a base64-encoded PSBT under a registered wallet policy.
    /// The `hmac` proves the policy registration to the device; `None` is
    /// accepted for default policies which need no registration.
    fn sign_psbt(
        &mut self,
        psbt: &str,
        policy: &WalletPolicy,
        hmac: Option<&[u8]>,
    ) -> Result<Vec<InputSignature>, DeviceFailure>;

    /// Signs an arbitrary message with the key at the given path, returning
    /// the signature in base64.
    fn sign_message(
        &mut self,
        message: &[u8],
        path: &DerivationPath<HardenedIndex>,
    ) -> Result<String, DeviceFailure>;
}

fn xonly(pubkey: &[u8]) -> Result<Bytes32, SignError> {
    let data = match pubkey.len() {
        32 => pubkey,
        // compressed key: drop the parity byte
        33 => &pubkey[1..],
        wrong => return Err(SignError::InvalidPubkey(wrong)),
    };
    let mut buf = [0u8; 32];
    buf.copy_from_slice(data);
    Ok(Bytes32::from(buf))
}

impl Psbt {
    /// Sends the document to the device for signing under the given policy
    /// and applies the returned signatures. Returns the number of signatures
    /// applied.
    pub fn sign_with(
        &mut self,
        device: &mut impl SigningDevice,
        policy: &WalletPolicy,
        hmac: Option<&[u8]>,
    ) -> Result<usize, SignError> {
        let signatures = device.sign_psbt(&self.to_string(), policy, hmac)?;
        self.apply_signatures(signatures)
    }

    /// Distributes device signatures into the input maps.
    ///
    /// An input carrying a taproot leaf script is treated as a script-path
    /// spend and receives a `PSBT_IN_TAP_SCRIPT_SIG` entry, with the leaf
    /// hash taken from the signature or computed from the first leaf script;
    /// any other input gets its signature as `PSBT_IN_TAP_KEY_SIG`.
    pub fn apply_signatures(
        &mut self,
        signatures: impl IntoIterator<Item = InputSignature>,
    ) -> Result<usize, SignError> {
        let mut count = 0usize;
        for sig in signatures {
            let input = self
                .input_mut(sig.input_index)
                .ok_or(SignError::InputOutOfRange(sig.input_index))?;
            match input.tap_leaf_script()? {
                Some(leaf) => {
                    let pubkey = xonly(&sig.pubkey)?;
                    let leaf_hash = sig
                        .leaf_hash
                        .unwrap_or_else(|| tap_leaf_hash(leaf.script.as_slice()));
                    input.set_tap_script_sig(pubkey, leaf_hash, &sig.signature);
                }
                None => input.set_tap_key_sig(&sig.signature),
            }
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod test_device {
    use super::*;

    pub const TEST_FP: [u8; 4] = [0x64, 0x3a, 0x7a, 0xdc];
    pub const TEST_XPUB: &str = "tpubDCNiWHaiSkgnQjuhsg9kjwaUzaxQjUcmhagvYzqQ3TYJTgFGJstVaq\
                                 nu4yhtFktBhCVFmBNLQ5sN53qKzZbMksm3XEyGJsEhQPfVZdWmTE2";

    #[derive(Default)]
    pub struct TestDevice {
        pub signatures: Vec<InputSignature>,
        pub signed_policies: Vec<String>,
    }

    impl SigningDevice for TestDevice {
        fn master_fingerprint(&mut self) -> Result<XpubFp, DeviceFailure> {
            Ok(XpubFp::from(TEST_FP))
        }

        fn extended_pubkey(
            &mut self,
            _path: &DerivationPath<HardenedIndex>,
        ) -> Result<String, DeviceFailure> {
            Ok(TEST_XPUB.to_owned())
        }

        fn sign_psbt(
            &mut self,
            _psbt: &str,
            policy: &WalletPolicy,
            _hmac: Option<&[u8]>,
        ) -> Result<Vec<InputSignature>, DeviceFailure> {
            self.signed_policies.push(policy.name.clone());
            Ok(self.signatures.clone())
        }

        fn sign_message(
            &mut self,
            _message: &[u8],
            _path: &DerivationPath<HardenedIndex>,
        ) -> Result<String, DeviceFailure> {
            Ok("c2lnbmVk".to_owned())
        }
    }
}
