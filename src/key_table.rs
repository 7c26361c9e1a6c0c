// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The segment key table (§4.B): the immutable list of expected content keys
//! for a segment's `N` blocks, plus the CRC-32 trailer that protects it on disk.

use crate::{
    block::{BlockKey, ContentKey, CryptoKey},
    checksum::Crc32,
    Error, Result,
};
use rustc_hash::FxHashMap;
use std::io::{Read, Write};

/// Byte length of one serialized [`BlockKey`]: content hash, crypto key, algorithm tag.
const ENTRY_LEN: usize = 32 + 32 + 1;

/// Immutable table of expected block key material for a segment, indexed by
/// block number `[0, N)` (data blocks first, then cross-check, then FEC-check).
#[derive(Clone)]
pub struct SegmentKeyTable {
    keys: Vec<BlockKey>,
    by_key: FxHashMap<ContentKey, u16>,
}

impl SegmentKeyTable {
    /// Builds a table from an ordered list of block keys.
    #[must_use]
    pub fn new(keys: Vec<BlockKey>) -> Self {
        let by_key = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.content, i as u16))
            .collect();
        Self { keys, by_key }
    }

    /// Number of blocks (`N`) described by this table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the expected key material for block `index`.
    #[must_use]
    pub fn key_at(&self, index: u16) -> Option<BlockKey> {
        self.keys.get(index as usize).copied()
    }

    /// Looks up which block number `key` corresponds to, skipping any index
    /// whose bit is set in `ignore_mask` (§4.B). `ignore_mask` of `None`
    /// performs an unconstrained lookup.
    #[must_use]
    pub fn block_number_of(&self, key: &ContentKey, ignore_mask: Option<&[bool]>) -> Option<u16> {
        let idx = *self.by_key.get(key)?;
        if let Some(mask) = ignore_mask {
            if mask.get(idx as usize).copied().unwrap_or(false) {
                return None;
            }
        }
        Some(idx)
    }

    /// Serializes the table followed by its CRC-32 trailer (§6 key list region).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut body = Vec::with_capacity(self.keys.len() * ENTRY_LEN);
        for key in &self.keys {
            body.extend_from_slice(key.content.as_bytes());
            body.extend_from_slice(&key.crypto.to_bytes());
            body.push(key.algo.to_tag());
        }
        writer.write_all(&body)?;
        Crc32::of(&body).write_to(writer)?;
        Ok(())
    }

    /// Byte length of the serialized form including the trailing CRC.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::encoded_len_for(self.keys.len())
    }

    /// Byte length a table of `count` entries would serialize to, without
    /// needing an instance (used to size a read buffer before parsing).
    #[must_use]
    pub fn encoded_len_for(count: usize) -> usize {
        count * ENTRY_LEN + 4
    }

    /// Parses a table of `count` keys from `reader`, verifying the trailing
    /// CRC-32. Fails with [`Error::KeysCorrupt`] on mismatch (§4.B).
    pub fn read_from<R: Read>(reader: &mut R, count: usize) -> Result<Self> {
        let mut body = vec![0u8; count * ENTRY_LEN];
        reader.read_exact(&mut body)?;

        let expected = Crc32::read_from(reader)?;
        let actual = Crc32::of(&body);
        if actual != expected {
            return Err(Error::KeysCorrupt);
        }

        let mut keys = Vec::with_capacity(count);
        for chunk in body.chunks_exact(ENTRY_LEN) {
            let mut content = [0u8; 32];
            content.copy_from_slice(&chunk[0..32]);
            let mut crypto = [0u8; 32];
            crypto.copy_from_slice(&chunk[32..64]);
            let algo = crate::block::CryptoAlgo::from_tag(chunk[64]).map_err(|_| Error::KeysCorrupt)?;

            keys.push(BlockKey {
                content: ContentKey::from_bytes(content),
                crypto: CryptoKey::from_bytes(crypto),
                algo,
            });
        }

        Ok(Self::new(keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{encode, CryptoAlgo, CryptoKey};

    fn sample_keys(n: usize) -> Vec<BlockKey> {
        (0..n)
            .map(|i| {
                let plaintext = vec![i as u8; 64];
                let crypto = CryptoKey::from_bytes([i as u8; 32]);
                let (_, content) = encode(&plaintext, &crypto, CryptoAlgo::Blake3Keystream);
                BlockKey {
                    content,
                    crypto,
                    algo: CryptoAlgo::Blake3Keystream,
                }
            })
            .collect()
    }

    #[test]
    fn lookup_roundtrip() {
        let keys = sample_keys(5);
        let table = SegmentKeyTable::new(keys.clone());

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.block_number_of(&key.content, None), Some(i as u16));
            assert_eq!(table.key_at(i as u16).map(|k| k.content), Some(key.content));
        }
    }

    #[test]
    fn ignore_mask_skips_present_blocks() {
        let keys = sample_keys(3);
        let table = SegmentKeyTable::new(keys.clone());
        let mask = vec![false, true, false];
        assert_eq!(table.block_number_of(&keys[1].content, Some(&mask)), None);
        assert_eq!(table.block_number_of(&keys[0].content, Some(&mask)), Some(0));
    }

    #[test]
    fn disk_roundtrip() {
        let keys = sample_keys(4);
        let table = SegmentKeyTable::new(keys);

        let mut buf = vec![];
        table.write_to(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = SegmentKeyTable::read_from(&mut cursor, 4).unwrap();
        assert_eq!(table.keys, read_back.keys);
    }

    #[test]
    fn detects_corrupt_crc() {
        let keys = sample_keys(2);
        let table = SegmentKeyTable::new(keys);

        let mut buf = vec![];
        table.write_to(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let mut cursor = std::io::Cursor::new(buf);
        let result = SegmentKeyTable::read_from(&mut cursor, 2);
        assert!(matches!(result, Err(Error::KeysCorrupt)));
    }
}
