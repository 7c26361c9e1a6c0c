// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The collaborator bundle a segment or cross-segment needs to do its job.
//!
//! [`crate::segment::Segment`] and [`crate::cross_segment::CrossSegment`]
//! never hold a permanent handle back to [`crate::parent::Parent`] (that
//! would be the reference cycle the design note in §9 calls out); instead
//! every method that needs the shared RAF, FEC codec, job runner, or sibling
//! segments takes an `&Environment` borrowed for the duration of the call, or
//! an owned `Arc<dyn Environment>` when the call escapes into a queued job.

use crate::{fec::FecCodec, fetcher::Fetcher, healer::Healer, job::JobRunner, raf::RafHandle};

/// Everything a segment or cross-segment borrows from its parent.
pub trait Environment: Send + Sync {
    /// The shared backing random-access file (§4.C, §5 "Resource sharing").
    fn raf(&self) -> &RafHandle;

    /// The stateless FEC codec (§6).
    fn fec(&self) -> &dyn FecCodec;

    /// The memory-bounded decode job queue (§5).
    fn job_runner(&self) -> &dyn JobRunner;

    /// The re-insertion collaborator (§6).
    fn healer(&self) -> &dyn Healer;

    /// The lifecycle-callback collaborator (§6).
    fn fetcher(&self) -> &dyn Fetcher;

    /// Notifies cross-segment `cross_index` that entry `entry_index` of its
    /// reference list just became available, handing over the block's
    /// already-verified plaintext (§4.D step 10, §4.E).
    fn notify_cross_segment(&self, cross_index: usize, entry_index: usize, bytes: Vec<u8>);

    /// Delivers a cross-segment-reconstructed block straight to segment
    /// `segment_index` (§4.E "hands reconstructed blocks back").
    fn deliver_decoded_block(&self, segment_index: usize, block_number: u16, bytes: Vec<u8>);

    /// Marks the whole splitfile failed after an unrecoverable disk error
    /// (§7 `DiskReadError`/`DiskWriteError` policy).
    fn fail_on_disk_error(&self, err: &crate::Error);
}
