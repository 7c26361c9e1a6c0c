// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The FEC codec contract (§6 "Collaborator contracts"). The codec library
//! itself is out of scope (§1); this module defines the trait the engine
//! depends on plus a small GF(256) Cauchy-matrix reference implementation
//! used to exercise the decode path in tests.

use crate::{Error, Result};

/// A systematic maximum-distance-separable erasure code over fixed-size
/// blocks, as consumed by the segment and cross-segment decode tasks.
pub trait FecCodec: Send + Sync {
    /// Fills every absent slot in `data` using whichever of `data`/`check`
    /// are marked present. Must succeed whenever
    /// `data_present.count() + check_present.count() >= data.len()`.
    fn decode(
        &self,
        data: &mut [Vec<u8>],
        check: &mut [Vec<u8>],
        data_present: &[bool],
        check_present: &[bool],
        block_size: usize,
    ) -> Result<()>;

    /// Recomputes every absent check block from a complete `data` set.
    fn encode(&self, data: &[Vec<u8>], check: &mut [Vec<u8>], block_size: usize) -> Result<()>;

    /// Estimated peak extra memory (bytes) a decode of `k` data blocks with
    /// `r` check blocks needs beyond the blocks themselves.
    fn max_memory_overhead_decode(&self, k: usize, r: usize) -> usize;

    /// Estimated peak extra memory (bytes) an encode of `k` data blocks with
    /// `r` check blocks needs beyond the blocks themselves.
    fn max_memory_overhead_encode(&self, k: usize, r: usize) -> usize;
}

/// GF(256) field arithmetic (AES reduction polynomial `0x11d`), used to build
/// a Cauchy-matrix systematic Reed-Solomon-style code.
mod gf256 {
    pub struct Tables {
        exp: [u8; 512],
        log: [u8; 256],
    }

    impl Tables {
        pub fn new() -> Self {
            let mut exp = [0u8; 512];
            let mut log = [0u8; 256];
            let mut x: u16 = 1;
            for i in 0..255usize {
                exp[i] = x as u8;
                log[x as usize] = i as u8;
                x <<= 1;
                if x & 0x100 != 0 {
                    x ^= 0x11d;
                }
            }
            for i in 255..512 {
                exp[i] = exp[i - 255];
            }
            Self { exp, log }
        }

        pub fn mul(&self, a: u8, b: u8) -> u8 {
            if a == 0 || b == 0 {
                return 0;
            }
            let sum = self.log[a as usize] as usize + self.log[b as usize] as usize;
            self.exp[sum]
        }

        pub fn inv(&self, a: u8) -> u8 {
            assert!(a != 0, "cannot invert zero in GF(256)");
            self.exp[255 - self.log[a as usize] as usize]
        }
    }
}

/// Reference implementation of [`FecCodec`]: a systematic code whose
/// generator matrix is `[I_k ; V]`, `V` a Cauchy matrix over GF(256).
/// Not performance-tuned; exists so the decode pipeline is exercisable
/// without a real external codec dependency.
pub struct CauchyFec {
    gf: gf256::Tables,
}

impl Default for CauchyFec {
    fn default() -> Self {
        Self::new()
    }
}

impl CauchyFec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gf: gf256::Tables::new(),
        }
    }

    /// Row `check_index` of the parity matrix, one coefficient per data
    /// column: `coeff[j] = 1 / (x_check ^ y_j)` in GF(256), a Cauchy matrix.
    ///
    /// Unlike a plain Vandermonde matrix, every square submatrix of a Cauchy
    /// matrix is invertible regardless of which rows/columns are chosen, so
    /// picking an arbitrary subset of present check rows and missing data
    /// columns during decode is always solvable.
    fn parity_row(&self, check_index: usize, k: usize) -> Vec<u8> {
        assert!(k + check_index < 256, "segment too large for byte-field FEC");
        let x = (k + check_index) as u8;
        (0..k)
            .map(|j| self.gf.inv(x ^ (j as u8)))
            .collect()
    }

    fn combine(&self, coeffs: &[u8], blocks: &[&[u8]], block_size: usize) -> Vec<u8> {
        let mut out = vec![0u8; block_size];
        for (coeff, block) in coeffs.iter().zip(blocks.iter()) {
            if *coeff == 0 {
                continue;
            }
            for (o, b) in out.iter_mut().zip(block.iter()) {
                *o ^= self.gf.mul(*coeff, *b);
            }
        }
        out
    }

    /// Gauss-Jordan inversion of a small square GF(256) matrix.
    fn invert(&self, matrix: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        let n = matrix.len();
        let mut a: Vec<Vec<u8>> = matrix.to_vec();
        let mut inv: Vec<Vec<u8>> = (0..n)
            .map(|i| (0..n).map(|j| u8::from(i == j)).collect())
            .collect();

        for col in 0..n {
            let pivot_row = (col..n).find(|&r| a[r][col] != 0).ok_or_else(|| {
                Error::FecFailure("singular recovery matrix: not enough distinct blocks".into())
            })?;
            a.swap(col, pivot_row);
            inv.swap(col, pivot_row);

            let pivot_inv = self.gf.inv(a[col][col]);
            for j in 0..n {
                a[col][j] = self.gf.mul(a[col][j], pivot_inv);
                inv[col][j] = self.gf.mul(inv[col][j], pivot_inv);
            }

            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = a[row][col];
                if factor == 0 {
                    continue;
                }
                for j in 0..n {
                    a[row][j] ^= self.gf.mul(factor, a[col][j]);
                    inv[row][j] ^= self.gf.mul(factor, inv[col][j]);
                }
            }
        }

        Ok(inv)
    }
}

impl FecCodec for CauchyFec {
    fn decode(
        &self,
        data: &mut [Vec<u8>],
        check: &mut [Vec<u8>],
        data_present: &[bool],
        check_present: &[bool],
        block_size: usize,
    ) -> Result<()> {
        let k = data.len();
        let missing: Vec<usize> = (0..k).filter(|&i| !data_present[i]).collect();
        if missing.is_empty() {
            return Ok(());
        }

        let present_count = data_present.iter().filter(|p| **p).count()
            + check_present.iter().filter(|p| **p).count();
        if present_count < k {
            return Err(Error::FecFailure(format!(
                "need {k} blocks to decode, only {present_count} present"
            )));
        }

        // Present data blocks carry no information about the missing ones
        // (their generator row is a trivial identity row restricted to zero
        // outside themselves), so only present check rows can supply the
        // `missing.len()` equations needed. The decode threshold guarantees
        // at least that many check rows are present.
        let present_data_idx: Vec<usize> = (0..k).filter(|&i| data_present[i]).collect();
        let present_check_idx: Vec<usize> = (0..check.len()).filter(|&i| check_present[i]).collect();

        if present_check_idx.len() < missing.len() {
            return Err(Error::FecFailure(
                "not enough check blocks present to recover missing data".into(),
            ));
        }
        let chosen_checks = &present_check_idx[..missing.len()];

        let mut sub_matrix = Vec::with_capacity(missing.len());
        let mut rhs = Vec::with_capacity(missing.len());

        for &idx in chosen_checks {
            let full_row = self.parity_row(idx, k);

            let mut observed = check[idx].clone();

            // Subtract (XOR) the contribution of present data columns,
            // leaving an equation purely in the missing columns.
            for &d in &present_data_idx {
                if full_row[d] == 0 {
                    continue;
                }
                let coeff = full_row[d];
                for (o, b) in observed.iter_mut().zip(data[d].iter()) {
                    *o ^= self.gf.mul(coeff, *b);
                }
            }

            let restricted: Vec<u8> = missing.iter().map(|&m| full_row[m]).collect();
            sub_matrix.push(restricted);
            rhs.push(observed);
        }

        let inv = self.invert(&sub_matrix)?;

        for (row, &missing_col) in inv.iter().zip(missing.iter()) {
            let refs: Vec<&[u8]> = rhs.iter().map(Vec::as_slice).collect();
            data[missing_col] = self.combine(row, &refs, block_size);
        }

        Ok(())
    }

    fn encode(&self, data: &[Vec<u8>], check: &mut [Vec<u8>], block_size: usize) -> Result<()> {
        let k = data.len();
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        for (i, slot) in check.iter_mut().enumerate() {
            let row = self.parity_row(i, k);
            *slot = self.combine(&row, &refs, block_size);
        }
        Ok(())
    }

    fn max_memory_overhead_decode(&self, k: usize, r: usize) -> usize {
        // Rough upper bound: the inversion matrix plus a working copy of
        // every present block, proportional to (k+r)^2 bytes plus the blocks.
        (k + r) * (k + r)
    }

    fn max_memory_overhead_encode(&self, k: usize, r: usize) -> usize {
        k * r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(pattern: &[u8], n: usize, size: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| vec![pattern[i % pattern.len()]; size])
            .collect()
    }

    #[test]
    fn encode_then_decode_single_erasure() {
        let fec = CauchyFec::new();
        let size = 64;
        let data = blocks(&[1, 2, 3], 3, size);
        let mut check = vec![vec![0u8; size]; 3];
        fec.encode(&data, &mut check, size).unwrap();

        let mut data_mut = data.clone();
        data_mut[1] = vec![0u8; size];
        let data_present = [true, false, true];
        let check_present = [true, true, true];

        fec.decode(&mut data_mut, &mut check, &data_present, &check_present, size)
            .unwrap();
        assert_eq!(data_mut[1], data[1]);
    }

    #[test]
    fn encode_then_decode_two_erasures() {
        let fec = CauchyFec::new();
        let size = 32;
        let data = blocks(&[9, 8, 7, 6], 4, size);
        let mut check = vec![vec![0u8; size]; 3];
        fec.encode(&data, &mut check, size).unwrap();

        let mut data_mut = data.clone();
        data_mut[0] = vec![0u8; size];
        data_mut[3] = vec![0u8; size];
        let data_present = [false, true, true, false];
        let check_present = [true, true, true];

        fec.decode(&mut data_mut, &mut check, &data_present, &check_present, size)
            .unwrap();
        assert_eq!(data_mut[0], data[0]);
        assert_eq!(data_mut[3], data[3]);
    }

    #[test]
    fn decode_fails_with_too_few_blocks() {
        let fec = CauchyFec::new();
        let size = 16;
        let mut data = vec![vec![0u8; size]; 3];
        let mut check = vec![vec![0u8; size]; 1];
        let data_present = [true, false, false];
        let check_present = [false];

        assert!(fec
            .decode(&mut data, &mut check, &data_present, &check_present, size)
            .is_err());
    }
}
