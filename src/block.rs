// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The block codec (§4.A): pure functions over a fixed-length buffer and a
//! crypto key, with no knowledge of segments, slots, or the network.

use crate::{Error, Result};

/// A block's self-certifying content hash key (CHK).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Wraps a raw 32-byte digest.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentKey({})", hex_preview(&self.0))
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

/// Symmetric key used to decrypt a block's ciphertext.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct CryptoKey([u8; 32]);

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey(..)")
    }
}

impl CryptoKey {
    /// Wraps a raw 32-byte key.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

/// The crypto scheme identifier carried alongside a [`CryptoKey`].
///
/// Only one scheme is implemented; the type exists so callers (and a future
/// scheme) have somewhere to dispatch on, matching how the splitfile's real
/// CHK layer names its algorithm out-of-band from the key bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CryptoAlgo {
    /// Keystream-XOR cipher with a BLAKE3-keyed MAC, the only scheme this
    /// engine speaks. Non-goal: re-keying or algorithm negotiation mid-fetch.
    Blake3Keystream,
}

/// The full key material for one block: the content hash used to identify
/// it on the wire, plus the decrypt key and algorithm carried alongside it in
/// the splitfile manifest (mirrors how a CHK URI bundles a routing key and a
/// crypto key together).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockKey {
    pub content: ContentKey,
    pub crypto: CryptoKey,
    pub algo: CryptoAlgo,
}

impl CryptoAlgo {
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            Self::Blake3Keystream => 0,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Blake3Keystream),
            _ => Err(Error::DecodeFailed),
        }
    }
}

/// A verified-on-the-wire CHK block: ciphertext followed by a keyed MAC.
#[derive(Clone)]
pub struct CiphertextBlock(Vec<u8>);

impl CiphertextBlock {
    /// Wraps raw bytes as received from the network.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the block (ciphertext + MAC).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

const MAC_LEN: usize = 32;

fn keystream(key: &CryptoKey, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut reader = blake3::Hasher::new_keyed(&key.0).finalize_xof();
    let mut chunk = [0u8; 4096];
    while out.len() < len {
        let take = (len - out.len()).min(chunk.len());
        reader.fill(&mut chunk[..take]);
        out.extend_from_slice(&chunk[..take]);
    }
    out
}

fn xor_into(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Encrypts `plaintext` (exactly `plaintext.len()` bytes, normally `L`) and
/// returns the wire block together with its content key. Deterministic.
#[must_use]
pub fn encode(plaintext: &[u8], key: &CryptoKey, _algo: CryptoAlgo) -> (CiphertextBlock, ContentKey) {
    let ks = keystream(key, plaintext.len());
    let ciphertext = xor_into(plaintext, &ks);

    let mac = blake3::keyed_hash(&key.0, &ciphertext);

    let mut block = Vec::with_capacity(ciphertext.len() + MAC_LEN);
    block.extend_from_slice(&ciphertext);
    block.extend_from_slice(mac.as_bytes());

    let content_key = ContentKey(*blake3::hash(&block).as_bytes());

    (CiphertextBlock(block), content_key)
}

/// Confirms that `block`'s content hash matches `expected`.
pub fn verify(block: &CiphertextBlock, expected: &ContentKey) -> Result<()> {
    let actual = ContentKey(*blake3::hash(&block.0).as_bytes());
    if actual == *expected {
        Ok(())
    } else {
        Err(Error::VerifyFailed)
    }
}

/// Decrypts a verified block back into plaintext.
pub fn decode(block: &CiphertextBlock, key: &CryptoKey) -> Result<Vec<u8>> {
    if block.0.len() < MAC_LEN {
        return Err(Error::DecodeFailed);
    }

    let (ciphertext, mac) = block.0.split_at(block.0.len() - MAC_LEN);
    let expected_mac = blake3::keyed_hash(&key.0, ciphertext);

    if expected_mac.as_bytes() != mac {
        return Err(Error::DecodeFailed);
    }

    let ks = keystream(key, ciphertext.len());
    Ok(xor_into(ciphertext, &ks))
}
