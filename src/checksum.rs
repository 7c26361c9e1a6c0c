// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CRC-32 trailer used to detect corruption of the on-disk key list (§6).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A 32-bit CRC checksum, big-endian on disk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Crc32(u32);

impl Crc32 {
    /// Computes the checksum of a byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(crc32fast::hash(bytes))
    }

    /// Wraps a raw checksum value.
    #[must_use]
    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw 32-bit integer.
    #[must_use]
    pub fn into_u32(self) -> u32 {
        self.0
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<BigEndian>(self.0)
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self(reader.read_u32::<BigEndian>()?))
    }
}

impl std::fmt::Display for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let sum = Crc32::of(b"hello world");
        let mut buf = vec![];
        sum.write_to(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let read_back = Crc32::read_from(&mut cursor).unwrap();
        assert_eq!(sum, read_back);
    }

    #[test]
    fn detects_corruption() {
        let sum = Crc32::of(b"hello world");
        let other = Crc32::of(b"hello worlD");
        assert_ne!(sum, other);
    }
}
