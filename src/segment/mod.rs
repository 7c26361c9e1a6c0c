// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-segment state machine (§3, §4.D) — the heart of the engine. Accepts
//! candidate blocks from the network, tracks presence, and drives the FEC
//! decode job once enough blocks have arrived.

mod status;

pub use status::StatusRegion;

use crate::{
    block::{self, ContentKey},
    coding::Encode,
    env::Environment,
    key_table::SegmentKeyTable,
    metadata::FixedMetadata,
    Error, Result,
};
use parking_lot::{Mutex, RwLock};
use std::{path::Path, sync::Arc};

/// Absolute on-disk offsets a segment was constructed with (§3 "On-disk
/// layout per segment").
#[derive(Copy, Clone, Debug)]
pub struct SegmentOffsets {
    pub block_data: u64,
    pub status: u64,
    pub key_list: u64,
}

/// Back-reference from a data/cross-check slot to the cross-segment entry
/// that cares about it (§3 `cross_by_block`).
#[derive(Copy, Clone, Debug)]
struct CrossRef {
    cross_index: usize,
    entry_index: usize,
}

struct Inner {
    /// `slot_block[0..M)`; `-1` means the slot is empty.
    slot_block: Vec<i16>,
    /// `present[0..N)`.
    present: Vec<bool>,
    /// `tried[0..N)`.
    tried: Vec<bool>,
    /// `retries[0..N)`, empty when retry tracking is disabled.
    retries: Vec<i32>,
    present_count: usize,
    succeeded: bool,
    finished: bool,
    failed: bool,
    decode_in_flight: bool,
    metadata_dirty: bool,
    cross_by_block: Vec<Option<CrossRef>>,
}

impl Inner {
    fn new(m: usize, n: usize, track_retries: bool) -> Self {
        Self {
            slot_block: vec![-1; m],
            present: vec![false; n],
            tried: vec![false; n],
            retries: if track_retries { vec![0; n] } else { Vec::new() },
            present_count: 0,
            succeeded: false,
            finished: false,
            failed: false,
            decode_in_flight: false,
            metadata_dirty: false,
            cross_by_block: vec![None; m],
        }
    }
}

/// One segment of `D` data + `X` cross-check + `C` FEC-check blocks sharing a
/// single FEC code instance.
pub struct Segment {
    /// Index of this segment within its splitfile; used for fetcher callbacks.
    pub index: usize,
    d: u32,
    x: u32,
    c: u32,
    m: usize,
    n: usize,
    block_size: usize,
    track_retries: bool,
    offsets: SegmentOffsets,
    inner: Mutex<Inner>,
    /// Weak cache stand-in (§9): `None` means "reclaimed, re-read on next use".
    keys: RwLock<Option<SegmentKeyTable>>,
}

impl Segment {
    /// Builds a fresh, empty segment (all slots `-1`, `present_count = 0`).
    /// Does not touch disk; callers write the initial key list and metadata
    /// separately (§3 "Lifetimes").
    #[must_use]
    pub fn new(
        index: usize,
        d: u32,
        x: u32,
        c: u32,
        block_size: usize,
        track_retries: bool,
        offsets: SegmentOffsets,
        keys: SegmentKeyTable,
    ) -> Self {
        let m = (d + x) as usize;
        let n = (d + x + c) as usize;
        assert_eq!(keys.len(), n, "key table length must equal D+X+C");

        Self {
            index,
            d,
            x,
            c,
            m,
            n,
            block_size,
            track_retries,
            offsets,
            inner: Mutex::new(Inner::new(m, n, track_retries)),
            keys: RwLock::new(Some(keys)),
        }
    }

    /// Decode threshold `M = D + X`.
    #[must_use]
    pub fn decode_threshold(&self) -> usize {
        self.m
    }

    /// Total block count `N = D + X + C`.
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.n
    }

    #[must_use]
    pub fn fixed_metadata(&self) -> FixedMetadata {
        FixedMetadata::new(
            self.d,
            self.x,
            self.c,
            StatusRegion::encoded_len(self.m, self.n, self.track_retries) as u32,
            self.keys
                .read()
                .as_ref()
                .map_or(0, |k| k.encoded_len() as u32),
        )
    }

    /// `write_fixed_metadata` (§6): serializes [`Self::fixed_metadata`] and
    /// atomically persists it to `path`, a small sidecar file distinct from
    /// the three RAF-backed regions — a reader needs this descriptor before
    /// it can even compute `SegmentOffsets` for the rest of the segment.
    /// Called once at construction and again whenever the segment's shape
    /// (status or key-list length) changes.
    pub fn write_fixed_metadata(&self, path: &Path) -> Result<()> {
        let buf = self.fixed_metadata().encode_into_vec();
        crate::fs::rewrite_atomic(path, &buf)?;
        Ok(())
    }

    /// Writes the key list region once, at construction (§3 "Lifetimes").
    pub fn write_initial_key_list(&self, env: &dyn Environment) -> Result<()> {
        let guard = self.keys.read();
        let table = guard.as_ref().expect("key table always populated at construction");
        let mut buf = Vec::with_capacity(table.encoded_len());
        table.write_to(&mut buf)?;
        env.raf().lock().pwrite(self.offsets.key_list, &buf)?;
        Ok(())
    }

    /// Loads the key table, re-reading from disk if the weak cache was
    /// reclaimed (§9 "Weak cache of key tables").
    fn load_keys(&self, env: &dyn Environment) -> Result<SegmentKeyTable> {
        if let Some(table) = self.keys.read().clone() {
            return Ok(table);
        }

        let lock = env.raf().lock();
        let mut buf = vec![0u8; SegmentKeyTable::encoded_len_for(self.n)];
        lock.pread(self.offsets.key_list, &mut buf)?;
        drop(lock);

        let mut cursor = std::io::Cursor::new(buf);
        let table = SegmentKeyTable::read_from(&mut cursor, self.n)?;
        *self.keys.write() = Some(table.clone());
        Ok(table)
    }

    /// Drops the cached key table, simulating reclamation under memory
    /// pressure (§9). Exposed for tests exercising the re-read path.
    pub fn evict_key_cache(&self) {
        *self.keys.write() = None;
    }

    /// Fast non-mutating predicate (§4.D `definitely_want_key`).
    pub fn definitely_want_key(&self, content_key: &ContentKey, env: &dyn Environment) -> bool {
        let inner = self.inner.lock();
        if inner.succeeded || inner.failed {
            return false;
        }
        let Ok(keys) = self.load_keys(env) else {
            return false;
        };
        keys.block_number_of(content_key, Some(&inner.present)).is_some()
    }

    /// `on_non_fatal_failure(block_number)` (§4.D).
    pub fn on_non_fatal_failure(&self, block_number: u16, env: &dyn Environment) {
        let mut inner = self.inner.lock();
        if block_number as usize >= self.n {
            return;
        }
        if self.track_retries {
            inner.retries[block_number as usize] += 1;
        }
        inner.tried[block_number as usize] = true;
        inner.metadata_dirty = true;
        drop(inner);
        let _ = self.flush_status(env);
    }

    /// The hot path (§4.D `on_got_key`). `self_arc` is required because, on
    /// crossing the decode threshold, a decode task is queued that needs an
    /// owned handle to this segment; `Segment` never stores that handle
    /// itself (§9 "Cyclic references").
    pub fn on_got_key(
        self_arc: &Arc<Segment>,
        content_key: &ContentKey,
        ciphertext: crate::block::CiphertextBlock,
        env: &Arc<dyn Environment>,
    ) -> bool {
        let seg = self_arc.as_ref();

        // Step 1-2: identify the block number under the lock.
        let b = {
            let inner = seg.inner.lock();
            if inner.succeeded || inner.failed {
                return false;
            }
            let Ok(keys) = seg.load_keys(env.as_ref()) else {
                return false;
            };
            match keys.block_number_of(content_key, Some(&inner.present)) {
                Some(b) => b,
                None => return false,
            }
        };

        // Step 3: re-check under lock, then release before the slow crypto work.
        {
            let inner = seg.inner.lock();
            if inner.present[b as usize] || inner.present_count >= seg.m {
                return false;
            }
        }

        // Step 4: verify + decode outside the lock.
        let Ok(keys) = seg.load_keys(env.as_ref()) else {
            return false;
        };
        let Some(entry) = keys.key_at(b) else {
            return false;
        };
        if block::verify(&ciphertext, &entry.content).is_err() {
            return false;
        }
        let Ok(plaintext) = block::decode(&ciphertext, &entry.crypto) else {
            return false;
        };

        // Step 5: the mandatory double-check. Verification is slow and ran
        // without the lock; the commit decision must be re-made under it.
        let mut inner = seg.inner.lock();
        if inner.succeeded || inner.failed || inner.present[b as usize] || inner.present_count >= seg.m {
            return false;
        }

        // Step 6: allocate a free slot.
        let Some(slot) = inner.slot_block.iter().position(|&s| s == -1) else {
            debug_assert!(false, "present_count < M but no free slot found");
            return false;
        };

        // Step 7: write under the RAF lock; revert in-memory on failure.
        let offset = seg.offsets.block_data + (slot * seg.block_size) as u64;
        if let Err(e) = env.raf().lock().pwrite(offset, &plaintext) {
            log::warn!("segment {}: disk write failed for slot {slot}: {e}", seg.index);
            drop(inner);
            env.fail_on_disk_error(&Error::Io(e));
            return false;
        }

        // Step 8: commit in-memory state.
        inner.slot_block[slot] = b as i16;
        inner.present[b as usize] = true;
        inner.present_count += 1;
        inner.metadata_dirty = true;
        let cross_ref = if (b as usize) < seg.m {
            inner.cross_by_block[b as usize].take()
        } else {
            None
        };
        drop(inner);

        // Step 9: flush status synchronously; arrivals are rare.
        if let Err(e) = seg.flush_status(env.as_ref()) {
            log::warn!("segment {}: status flush failed: {e}", seg.index);
        }

        // Step 10: notify any cross-segment waiting on this slot.
        if let Some(cross_ref) = cross_ref {
            env.notify_cross_segment(cross_ref.cross_index, cross_ref.entry_index, plaintext);
        }

        // Step 11.
        Self::try_start_decode(self_arc, env);

        true
    }

    /// Registers that cross-segment `cross_index` entry `entry_index` wants
    /// to be notified once data/cross-check slot `block_number` arrives.
    pub fn register_cross_ref(&self, block_number: u16, cross_index: usize, entry_index: usize) {
        let mut inner = self.inner.lock();
        if (block_number as usize) < self.m {
            inner.cross_by_block[block_number as usize] = Some(CrossRef {
                cross_index,
                entry_index,
            });
        }
    }

    /// Delivers a block reconstructed by a cross-segment directly (§4.E
    /// "hands reconstructed blocks back ... behaves exactly like an
    /// `on_got_key` commit"). The bytes are already plaintext and were
    /// already verified as part of the cross-segment's own decode, so this
    /// skips straight to the commit steps.
    pub fn on_decoded_block(
        self_arc: &Arc<Segment>,
        block_number: u16,
        plaintext: Vec<u8>,
        env: &Arc<dyn Environment>,
    ) -> bool {
        let seg = self_arc.as_ref();
        let mut inner = seg.inner.lock();
        if inner.succeeded || inner.failed || inner.present[block_number as usize] {
            return false;
        }
        let Some(slot) = inner.slot_block.iter().position(|&s| s == -1) else {
            return false;
        };

        let offset = seg.offsets.block_data + (slot * seg.block_size) as u64;
        if let Err(e) = env.raf().lock().pwrite(offset, &plaintext) {
            log::warn!("segment {}: disk write failed for slot {slot}: {e}", seg.index);
            drop(inner);
            env.fail_on_disk_error(&Error::Io(e));
            return false;
        }

        inner.slot_block[slot] = block_number as i16;
        inner.present[block_number as usize] = true;
        inner.present_count += 1;
        inner.metadata_dirty = true;
        let cross_ref = if (block_number as usize) < seg.m {
            inner.cross_by_block[block_number as usize].take()
        } else {
            None
        };
        drop(inner);

        if let Err(e) = seg.flush_status(env.as_ref()) {
            log::warn!("segment {}: status flush failed: {e}", seg.index);
        }

        if let Some(cross_ref) = cross_ref {
            env.notify_cross_segment(cross_ref.cross_index, cross_ref.entry_index, plaintext);
        }

        Self::try_start_decode(self_arc, env);
        true
    }

    /// `try_start_decode` (§4.D): idempotent, submits a decode task to the
    /// memory-bounded job queue once the threshold is crossed.
    pub fn try_start_decode(self_arc: &Arc<Segment>, env: &Arc<dyn Environment>) -> bool {
        let seg = self_arc.as_ref();
        let mut inner = seg.inner.lock();
        if inner.present_count < seg.m || inner.decode_in_flight || inner.succeeded || inner.failed {
            return false;
        }
        inner.decode_in_flight = true;
        drop(inner);

        let decode_overhead = env.fec().max_memory_overhead_decode(seg.m, seg.c as usize);
        let encode_overhead = env.fec().max_memory_overhead_encode(seg.m, seg.c as usize);
        let estimate = seg.n * seg.block_size + decode_overhead.max(encode_overhead);

        let task_segment = Arc::clone(self_arc);
        let task_env = Arc::clone(env);
        let admitted = env.job_runner().queue_job(
            estimate,
            crate::job::Priority::Low,
            Box::new(move || {
                task_segment.run_decode_task(&task_env);
            }),
        );

        // Rejected jobs never reach `run_decode_task`, so nothing will ever
        // clear `decode_in_flight` on their behalf; clear it here so a later
        // arrival or memory reclamation can retry the decode.
        if !admitted {
            seg.inner.lock().decode_in_flight = false;
        }

        admitted
    }

    /// The decode task (§4.D steps 1-13), run on the job runner's thread.
    fn run_decode_task(&self, env: &Arc<dyn Environment>) {
        let result = self.run_decode_task_inner(env.as_ref());
        if let Err(e) = result {
            log::warn!("segment {}: decode task failed: {e}", self.index);
        }

        let mut inner = self.inner.lock();
        inner.decode_in_flight = false;
    }

    fn run_decode_task_inner(&self, env: &dyn Environment) -> Result<()> {
        // Step 1: snapshot.
        let (slot_block, present) = {
            let inner = self.inner.lock();
            if inner.succeeded || inner.failed {
                return Ok(());
            }
            (inner.slot_block.clone(), inner.present.clone())
        };

        // Step 2: read all M slots.
        let mut slot_bytes: Vec<Vec<u8>> = Vec::with_capacity(self.m);
        {
            let lock = env.raf().lock();
            for slot in 0..self.m {
                let mut buf = vec![0u8; self.block_size];
                let offset = self.offsets.block_data + (slot * self.block_size) as u64;
                lock.pread(offset, &mut buf)?;
                slot_bytes.push(buf);
            }
        }

        // Step 3: load keys.
        let keys = self.load_keys(env)?;

        // Step 4: reconciliation pass, under the lock.
        struct Candidate {
            slot: usize,
            declared_block: u16,
        }
        let mut candidates = Vec::with_capacity(self.m);
        {
            let mut inner = self.inner.lock();
            if inner.succeeded || inner.failed {
                return Ok(());
            }

            let mut seen = vec![false; self.n];
            for (slot, &declared) in slot_block.iter().enumerate() {
                if declared < 0 || declared as usize >= self.n || seen[declared as usize] {
                    if inner.slot_block[slot] == declared {
                        inner.slot_block[slot] = -1;
                        inner.metadata_dirty = true;
                        if declared >= 0 && (declared as usize) < self.n {
                            if inner.present[declared as usize] {
                                inner.present[declared as usize] = false;
                                inner.present_count = inner.present_count.saturating_sub(1);
                            }
                        }
                    }
                    continue;
                }
                seen[declared as usize] = true;
                candidates.push(Candidate {
                    slot,
                    declared_block: declared as u16,
                });
            }

            let recomputed = inner.present.iter().filter(|p| **p).count();
            if recomputed != inner.present_count {
                inner.present_count = recomputed;
                inner.metadata_dirty = true;
            }
        }

        // Step 5.
        if candidates.len() < self.m {
            self.flush_status(env)?;
            return Ok(());
        }

        // Step 6: verification pass, outside the lock.
        let mut validated: Vec<(u16, Vec<u8>)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let bytes = slot_bytes[candidate.slot].clone();
            let Some(expected) = keys.key_at(candidate.declared_block) else {
                continue;
            };
            let (_, actual_content) = block::encode(&bytes, &expected.crypto, expected.algo);

            let resolved_block = if actual_content == expected.content {
                Some(candidate.declared_block)
            } else {
                keys.block_number_of(&actual_content, None)
            };

            match resolved_block {
                Some(resolved) if resolved == candidate.declared_block => {
                    validated.push((resolved, bytes));
                }
                Some(resolved) => {
                    // Reassign: the slot holds a different valid block than declared.
                    let mut inner = self.inner.lock();
                    inner.slot_block[candidate.slot] = resolved as i16;
                    inner.metadata_dirty = true;
                    drop(inner);
                    validated.push((resolved, bytes));
                }
                None => {
                    log::warn!(
                        "segment {}: slot {} content does not match any expected block; clearing",
                        self.index,
                        candidate.slot
                    );
                    let mut inner = self.inner.lock();
                    inner.slot_block[candidate.slot] = -1;
                    if inner.present[candidate.declared_block as usize] {
                        inner.present[candidate.declared_block as usize] = false;
                        inner.present_count = inner.present_count.saturating_sub(1);
                    }
                    inner.metadata_dirty = true;
                }
            }
        }

        // Step 7.
        if validated.len() < self.m {
            self.flush_status(env)?;
            return Ok(());
        }

        // Step 8: lay out data/check arrays.
        let mut data: Vec<Vec<u8>> = vec![vec![0u8; self.block_size]; self.m];
        let mut check: Vec<Vec<u8>> = vec![vec![0u8; self.block_size]; self.c as usize];
        let mut data_present = vec![false; self.m];
        let mut check_present = vec![false; self.c as usize];

        for (block_number, bytes) in &validated {
            let idx = *block_number as usize;
            if idx < self.m {
                data[idx] = bytes.clone();
                data_present[idx] = true;
            } else {
                let check_idx = idx - self.m;
                check[check_idx] = bytes.clone();
                check_present[check_idx] = true;
            }
        }

        // Step 9: FEC decode if any data slot is still missing.
        if data_present.iter().any(|p| !p) {
            env.fec()
                .decode(&mut data, &mut check, &data_present, &check_present, self.block_size)?;
        }

        // Step 10: commit canonical slots under both locks.
        let previously_tried: Vec<bool>;
        {
            let mut inner = self.inner.lock();
            if inner.succeeded || inner.failed {
                return Ok(());
            }

            let lock = env.raf().lock();
            for (i, block) in data.iter().enumerate() {
                let offset = self.offsets.block_data + (i * self.block_size) as u64;
                lock.pwrite(offset, block)?;
                inner.slot_block[i] = i as i16;
                inner.present[i] = true;
            }
            drop(lock);

            inner.present_count = inner.present.iter().filter(|p| **p).count();
            inner.succeeded = true;
            inner.metadata_dirty = true;
            previously_tried = inner.tried.clone();
        }

        // Step 11: notify parent + fire remaining cross-segment callbacks.
        env.fetcher().finished_success(self.index);
        {
            let mut inner = self.inner.lock();
            let remaining: Vec<(usize, CrossRef)> = inner
                .cross_by_block
                .iter_mut()
                .enumerate()
                .filter_map(|(i, slot)| slot.take().map(|cross_ref| (i, cross_ref)))
                .collect();
            drop(inner);
            for (i, cross_ref) in remaining {
                env.notify_cross_segment(cross_ref.cross_index, cross_ref.entry_index, data[i].clone());
            }
        }

        // Step 12: re-encode missing check blocks (kept in memory only — the
        // block data region holds just the `M` canonical slots, per §3) and
        // heal blocks that were tried but missing before this decode.
        if self.c > 0 {
            env.fec().encode(&data, &mut check, self.block_size)?;
        }

        for (i, was_tried) in previously_tried.iter().enumerate() {
            if *was_tried && !present[i] {
                if let Some(entry) = keys.key_at(i as u16) {
                    let bytes = if i < self.m { data[i].clone() } else { check[i - self.m].clone() };
                    env.healer().queue_heal(bytes, entry.crypto, entry.algo);
                }
            }
        }

        // Step 13.
        self.flush_status(env)?;
        {
            let mut inner = self.inner.lock();
            inner.finished = true;
        }
        env.fetcher().finished_encoding(self.index);

        Ok(())
    }

    /// Flushes the status region if dirty, clearing `metadata_dirty`.
    pub fn flush_status(&self, env: &dyn Environment) -> Result<()> {
        let region = {
            let mut inner = self.inner.lock();
            if !inner.metadata_dirty {
                return Ok(());
            }
            inner.metadata_dirty = false;
            StatusRegion {
                slot_block: inner.slot_block.clone(),
                retries: self.track_retries.then(|| inner.retries.clone()),
                tried: inner.tried.clone(),
            }
        };

        let mut buf = Vec::with_capacity(StatusRegion::encoded_len(self.m, self.n, self.track_retries));
        region.write_to(&mut buf)?;
        env.raf().lock().pwrite(self.offsets.status, &buf)?;
        Ok(())
    }

    /// Reads and applies a persisted status region, for crash recovery.
    pub fn load_status(&self, env: &dyn Environment) -> Result<()> {
        let lock = env.raf().lock();
        let mut buf = vec![0u8; StatusRegion::encoded_len(self.m, self.n, self.track_retries)];
        lock.pread(self.offsets.status, &mut buf)?;
        drop(lock);

        let mut cursor = std::io::Cursor::new(buf);
        let region = StatusRegion::read_from(&mut cursor, self.m, self.n, self.track_retries)?;

        let mut inner = self.inner.lock();
        inner.slot_block = region.slot_block;
        if let Some(retries) = region.retries {
            inner.retries = retries;
        }
        inner.tried = region.tried;
        inner.present = vec![false; self.n];
        for &b in &inner.slot_block {
            if b >= 0 {
                inner.present[b as usize] = true;
            }
        }
        inner.present_count = inner.present.iter().filter(|p| **p).count();
        Ok(())
    }

    /// Marks the segment terminally failed (§5 "Cancellation", §7).
    pub fn mark_failed(&self) {
        let mut inner = self.inner.lock();
        inner.failed = true;
    }

    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.inner.lock().succeeded
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.inner.lock().failed
    }

    #[must_use]
    pub fn present_count(&self) -> usize {
        self.inner.lock().present_count
    }

    #[must_use]
    pub fn retries_of(&self, block_number: u16) -> i32 {
        let inner = self.inner.lock();
        if self.track_retries {
            inner.retries[block_number as usize]
        } else {
            0
        }
    }

    #[must_use]
    pub fn tried(&self, block_number: u16) -> bool {
        self.inner.lock().tried[block_number as usize]
    }

    /// Reads the first `D` canonical slots, concatenated, once `succeeded`
    /// (§4.F `write_out`).
    pub fn write_to<W: std::io::Write>(&self, writer: &mut W, env: &dyn Environment) -> Result<()> {
        if !self.inner.lock().succeeded {
            return Err(Error::Unrecoverable);
        }
        let lock = env.raf().lock();
        for slot in 0..self.d as usize {
            let mut buf = vec![0u8; self.block_size];
            let offset = self.offsets.block_data + (slot * self.block_size) as u64;
            lock.pread(offset, &mut buf)?;
            writer.write_all(&buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
