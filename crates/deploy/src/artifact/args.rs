//! Constructor arguments and their fingerprint.

use std::str::FromStr;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::DeployError;

/// ABI-encoded constructor arguments, appended to a template's bytecode on publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstructorArgs(Bytes);

impl ConstructorArgs {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start encoding static arguments word by word.
    pub fn encoder() -> ArgsEncoder {
        ArgsEncoder::default()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 of the encoded arguments, hex encoded.
    ///
    /// Used to tell whether an existing ledger entry was published with the same
    /// arguments.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        hex::encode(hasher.finalize())
    }
}

impl From<Bytes> for ConstructorArgs {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl FromStr for ConstructorArgs {
    type Err = DeployError;

    /// Parse a hex string, with or without `0x`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|e| DeployError::InvalidArgs(e.to_string()))?;
        Ok(Self(decoded.into()))
    }
}

/// Head-only ABI encoder for static argument types.
#[derive(Debug, Default)]
pub struct ArgsEncoder {
    words: Vec<B256>,
}

impl ArgsEncoder {
    pub fn address(mut self, address: Address) -> Self {
        self.words.push(address.into_word());
        self
    }

    pub fn uint(mut self, value: U256) -> Self {
        self.words.push(B256::from(value));
        self
    }

    pub fn u64(self, value: u64) -> Self {
        self.uint(U256::from(value))
    }

    pub fn bool(self, value: bool) -> Self {
        self.uint(U256::from(value as u8))
    }

    pub fn word(mut self, word: B256) -> Self {
        self.words.push(word);
        self
    }

    pub fn finish(self) -> ConstructorArgs {
        let bytes: Vec<u8> = self.words.iter().flat_map(|w| w.0).collect();
        ConstructorArgs(bytes.into())
    }
}
