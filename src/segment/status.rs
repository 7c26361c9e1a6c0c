// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The on-disk segment status region (§6): `slot_block`, optional `retries`,
//! and `tried`, packed back to back with no padding.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A decoded snapshot of a segment's status region, ready to be written back
/// or folded into in-memory state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusRegion {
    /// `slot_block[0..M)`; `-1` marks an empty slot.
    pub slot_block: Vec<i16>,
    /// `retries[0..N)`, present only when the segment tracks retries.
    pub retries: Option<Vec<i32>>,
    /// `tried[0..N)`.
    pub tried: Vec<bool>,
}

impl StatusRegion {
    /// Byte length of the encoded region for `m` slots and `n` blocks, with
    /// or without the retries sub-region.
    #[must_use]
    pub fn encoded_len(m: usize, n: usize, has_retries: bool) -> usize {
        2 * m + if has_retries { 4 * n } else { 0 } + n
    }

    /// Serializes in the fixed field order: slots, then retries, then tried.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for &s in &self.slot_block {
            writer.write_i16::<BigEndian>(s)?;
        }
        if let Some(retries) = &self.retries {
            for &r in retries {
                writer.write_i32::<BigEndian>(r)?;
            }
        }
        for &t in &self.tried {
            writer.write_u8(u8::from(t))?;
        }
        Ok(())
    }

    /// Parses a region for a segment with `m` slots and `n` blocks.
    pub fn read_from<R: Read>(reader: &mut R, m: usize, n: usize, has_retries: bool) -> std::io::Result<Self> {
        let mut slot_block = Vec::with_capacity(m);
        for _ in 0..m {
            slot_block.push(reader.read_i16::<BigEndian>()?);
        }

        let retries = if has_retries {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.read_i32::<BigEndian>()?);
            }
            Some(v)
        } else {
            None
        };

        let mut tried = Vec::with_capacity(n);
        for _ in 0..n {
            tried.push(reader.read_u8()? != 0);
        }

        Ok(Self {
            slot_block,
            retries,
            tried,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_retries() {
        let region = StatusRegion {
            slot_block: vec![-1, 0, 2],
            retries: Some(vec![0, 3, 0, 1, 0, 0]),
            tried: vec![false, true, false, true, false, false],
        };

        let mut buf = vec![];
        region.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), StatusRegion::encoded_len(3, 6, true));

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = StatusRegion::read_from(&mut cursor, 3, 6, true).unwrap();
        assert_eq!(region, read_back);
    }

    #[test]
    fn roundtrip_without_retries() {
        let region = StatusRegion {
            slot_block: vec![0, 1],
            retries: None,
            tried: vec![true, true, false],
        };

        let mut buf = vec![];
        region.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), StatusRegion::encoded_len(2, 3, false));

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = StatusRegion::read_from(&mut cursor, 2, 3, false).unwrap();
        assert_eq!(region, read_back);
    }
}
