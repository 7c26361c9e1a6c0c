// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The fixed metadata descriptor (§6): the small, versioned header a parent
//! writes once per segment describing its shape and on-disk region lengths.

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    config::VERSION,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Describes one segment's FEC shape and on-disk region lengths, as emitted
/// by `write_fixed_metadata` (§6).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FixedMetadata {
    /// Format version; currently always [`VERSION`].
    pub version: u16,
    /// Data block count.
    pub d: u32,
    /// Cross-check block count.
    pub x: u32,
    /// FEC check block count.
    pub c: u32,
    /// Padded length of the status region, in bytes.
    pub padded_status_len: u32,
    /// Length of the key list region, in bytes (including its CRC trailer).
    pub key_list_len: u32,
}

impl FixedMetadata {
    /// Builds a descriptor for a segment with the given shape.
    #[must_use]
    pub fn new(d: u32, x: u32, c: u32, status_len: u32, key_list_len: u32) -> Self {
        Self {
            version: VERSION,
            d,
            x,
            c,
            padded_status_len: status_len,
            key_list_len,
        }
    }

    /// `M = D + X`, the decode threshold.
    #[must_use]
    pub fn m(&self) -> u32 {
        self.d + self.x
    }

    /// `N = D + X + C`, the total block count.
    #[must_use]
    pub fn n(&self) -> u32 {
        self.d + self.x + self.c
    }
}

impl Encode for FixedMetadata {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u16::<BigEndian>(self.version)?;
        writer.write_u32::<BigEndian>(self.d)?;
        writer.write_u32::<BigEndian>(self.x)?;
        writer.write_u32::<BigEndian>(self.c)?;
        writer.write_u32::<BigEndian>(self.padded_status_len)?;
        writer.write_u32::<BigEndian>(self.key_list_len)?;
        Ok(())
    }
}

impl Decode for FixedMetadata {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let version = reader.read_u16::<BigEndian>()?;
        if version != VERSION {
            return Err(DecodeError::InvalidFormat("unsupported metadata version"));
        }
        Ok(Self {
            version,
            d: reader.read_u32::<BigEndian>()?,
            x: reader.read_u32::<BigEndian>()?,
            c: reader.read_u32::<BigEndian>()?,
            padded_status_len: reader.read_u32::<BigEndian>()?,
            key_list_len: reader.read_u32::<BigEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let meta = FixedMetadata::new(3, 1, 3, 42, 228);
        let bytes = meta.encode_into_vec();
        let mut cursor = std::io::Cursor::new(bytes);
        let read_back = FixedMetadata::decode_from(&mut cursor).unwrap();
        assert_eq!(meta, read_back);
        assert_eq!(read_back.m(), 4);
        assert_eq!(read_back.n(), 7);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = vec![];
        bytes.write_u16::<BigEndian>(99).unwrap();
        bytes.write_u32::<BigEndian>(1).unwrap();
        bytes.write_u32::<BigEndian>(0).unwrap();
        bytes.write_u32::<BigEndian>(1).unwrap();
        bytes.write_u32::<BigEndian>(0).unwrap();
        bytes.write_u32::<BigEndian>(0).unwrap();

        let mut cursor = std::io::Cursor::new(bytes);
        assert!(FixedMetadata::decode_from(&mut cursor).is_err());
    }
}
