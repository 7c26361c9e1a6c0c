// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Parent storage (§4.F): owns the shared RAF, the FEC codec, the job
//! runner, the healer, the fetcher, and the full vector of segments and
//! cross-segments for one splitfile. Routes arriving blocks to the segment
//! that wants them and implements [`Environment`] on their behalf.

use crate::{
    block::{CiphertextBlock, ContentKey},
    cross_segment::CrossSegment,
    env::Environment,
    fec::FecCodec,
    fetcher::Fetcher,
    healer::Healer,
    job::JobRunner,
    raf::RafHandle,
    segment::Segment,
    Error, Result,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

/// Owns every segment and cross-segment of one splitfile and wires them
/// together without either side holding a permanent handle to the other
/// (§9 "Cyclic references" — segments and cross-segments only ever see a
/// borrowed or transiently-owned `Environment`).
pub struct Parent {
    raf: RafHandle,
    fec: Box<dyn FecCodec>,
    jobs: Box<dyn JobRunner>,
    healer: Box<dyn Healer>,
    fetcher: Box<dyn Fetcher>,
    segments: Vec<Arc<Segment>>,
    cross_segments: Vec<Arc<CrossSegment>>,
    failed: AtomicBool,
    self_weak: Weak<Parent>,
}

impl Parent {
    /// Builds a parent from its segments, cross-segments, and collaborators.
    ///
    /// `cross_segments` are wired to their owning segments here: for every
    /// entry of every cross-segment, the owning segment is told (via
    /// [`Segment::register_cross_ref`]) to notify that cross-segment once the
    /// referenced slot arrives. This is the one place that crosses both
    /// vectors — neither a segment nor a cross-segment does it itself.
    #[must_use]
    pub fn new(
        raf: RafHandle,
        fec: Box<dyn FecCodec>,
        jobs: Box<dyn JobRunner>,
        healer: Box<dyn Healer>,
        fetcher: Box<dyn Fetcher>,
        segments: Vec<Arc<Segment>>,
        cross_segments: Vec<Arc<CrossSegment>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            for (cross_index, cross_segment) in cross_segments.iter().enumerate() {
                for entry_index in 0..cross_segment.entry_count() {
                    let entry = cross_segment.entry_at(entry_index);
                    if let Some(segment) = segments.get(entry.segment_index) {
                        segment.register_cross_ref(entry.block_index, cross_index, entry_index);
                    }
                }
            }

            Self {
                raf,
                fec,
                jobs,
                healer,
                fetcher,
                segments,
                cross_segments,
                failed: AtomicBool::new(false),
                self_weak: weak.clone(),
            }
        })
    }

    fn env_arc(&self) -> Arc<dyn Environment> {
        self.self_weak.upgrade().expect("parent outlives its own callbacks") as Arc<dyn Environment>
    }

    /// `route_block` (§4.F): probes every still-live segment with the cheap
    /// `definitely_want_key` predicate and delegates to the first match.
    /// Returns whether any segment accepted the block.
    pub fn route_block(&self, key: &ContentKey, ciphertext: CiphertextBlock) -> bool {
        if self.failed.load(Ordering::Acquire) {
            return false;
        }
        let env = self.env_arc();
        for segment in &self.segments {
            if segment.definitely_want_key(key, env.as_ref()) {
                return Segment::on_got_key(segment, key, ciphertext, &env);
            }
        }
        false
    }

    /// `write_out` (§4.F): concatenates every segment's reconstructed data
    /// blocks, in segment order, into `writer`. Fails if any segment has not
    /// yet succeeded.
    pub fn write_out<W: std::io::Write>(&self, writer: &mut W) -> Result<()> {
        let env = self.env_arc();
        for segment in &self.segments {
            segment.write_to(writer, env.as_ref())?;
        }
        Ok(())
    }

    /// Whether every segment has reached its terminal success state.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.segments.iter().all(Segment::is_succeeded)
    }

    /// Whether the splitfile has been marked terminally failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// `write_fixed_metadata` (§6): persists every segment's fixed metadata
    /// descriptor to its own sidecar file under `dir`, named
    /// `segment-{index}.meta`. Call once after construction (and again after
    /// any change to a segment's shape) so a future opener can rebuild
    /// `SegmentOffsets` without first reading the shared RAF.
    pub fn write_fixed_metadata(&self, dir: &std::path::Path) -> Result<()> {
        for segment in &self.segments {
            let path = dir.join(format!("segment-{}.meta", segment.index));
            segment.write_fixed_metadata(&path)?;
        }
        Ok(())
    }

    /// Flushes the status region of every segment that has dirtied it since
    /// the last flush (§4.F "Metadata flushes are coalesced"). Intended to be
    /// driven by a periodic background task; a single call here does one
    /// round, leaving scheduling to the caller.
    pub fn lazy_write_metadata(&self) -> Result<()> {
        let env = self.env_arc();
        for segment in &self.segments {
            segment.flush_status(env.as_ref())?;
        }
        Ok(())
    }

    /// Marks every segment failed, e.g. on explicit cancellation (§5
    /// "Cancellation").
    pub fn cancel(&self) {
        self.failed.store(true, Ordering::Release);
        for segment in &self.segments {
            segment.mark_failed();
        }
        self.fetcher.failed(None);
    }

    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&Arc<Segment>> {
        self.segments.get(index)
    }

    #[must_use]
    pub fn cross_segment(&self, index: usize) -> Option<&Arc<CrossSegment>> {
        self.cross_segments.get(index)
    }
}

impl Environment for Parent {
    fn raf(&self) -> &RafHandle {
        &self.raf
    }

    fn fec(&self) -> &dyn FecCodec {
        self.fec.as_ref()
    }

    fn job_runner(&self) -> &dyn JobRunner {
        self.jobs.as_ref()
    }

    fn healer(&self) -> &dyn Healer {
        self.healer.as_ref()
    }

    fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    fn notify_cross_segment(&self, cross_index: usize, entry_index: usize, bytes: Vec<u8>) {
        let Some(cross_segment) = self.cross_segments.get(cross_index) else {
            return;
        };
        let env = self.env_arc();
        CrossSegment::on_fetched_relevant_block(cross_segment, entry_index, bytes, &env);
    }

    fn deliver_decoded_block(&self, segment_index: usize, block_number: u16, bytes: Vec<u8>) {
        let Some(segment) = self.segments.get(segment_index) else {
            return;
        };
        let env = self.env_arc();
        Segment::on_decoded_block(segment, block_number, bytes, &env);
    }

    fn fail_on_disk_error(&self, err: &Error) {
        log::error!("parent: disk error, failing splitfile: {err}");
        self.cancel();
    }
}
