// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A per-segment fetch storage engine for content-addressed splitfiles.
//!
//! ##### About
//!
//! A splitfile is a large payload broken into fixed-size encrypted blocks,
//! each addressable by a content hash. Blocks within a segment are protected
//! by a systematic forward-error-correcting (FEC) code; larger files
//! additionally protect blocks across segments with a second FEC layer
//! ("cross-segment FEC"). This crate is the engine that accepts arriving
//! candidate blocks from an unreliable network, verifies them against their
//! expected content keys, persists them to a backing random-access file,
//! reconstructs missing blocks via FEC once enough have arrived, and emits
//! healing blocks for re-insertion — all while tolerating corruption of its
//! own on-disk metadata.
//!
//! The network client, the FEC codec library proper, and the high-level
//! fetch orchestrator that decides *which* blocks to request are out of
//! scope; this crate only owns persistent state and the invariants that
//! connect on-disk bytes to cryptographic identities.
//!
//! # Example usage
//!
//! ```
//! use splitfile_fetch_storage::{
//!     block::{self, CryptoAlgo, CryptoKey},
//!     fec::CauchyFec,
//!     fetcher::RecordingFetcher,
//!     healer::RecordingHealer,
//!     job::InlineJobRunner,
//!     key_table::SegmentKeyTable,
//!     parent::Parent,
//!     raf::RafHandle,
//!     segment::{Segment, SegmentOffsets, StatusRegion},
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> splitfile_fetch_storage::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let raf = RafHandle::open(&dir.path().join("splitfile.raf"))?;
//!
//! let block_size = 32;
//! let plaintext = vec![vec![7u8; block_size]]; // D = 1, X = 0, C = 0
//! let crypto = CryptoKey::from_bytes([1u8; 32]);
//! let (ciphertext, content) = block::encode(&plaintext[0], &crypto, CryptoAlgo::Blake3Keystream);
//!
//! let keys = SegmentKeyTable::new(vec![block::BlockKey { content, crypto, algo: CryptoAlgo::Blake3Keystream }]);
//! let status_len = StatusRegion::encoded_len(1, 1, true) as u64;
//! let offsets = SegmentOffsets { block_data: 0, status: block_size as u64, key_list: block_size as u64 + status_len };
//! let segment = Arc::new(Segment::new(0, 1, 0, 0, block_size, true, offsets, keys));
//!
//! let parent = Parent::new(
//!     raf,
//!     Box::new(CauchyFec::new()),
//!     Box::new(InlineJobRunner::new(64 * 1024 * 1024)),
//!     Box::new(RecordingHealer::new()),
//!     Box::new(RecordingFetcher::new()),
//!     vec![segment],
//!     vec![],
//! );
//!
//! assert!(parent.route_block(&content, ciphertext));
//! assert!(parent.is_complete());
//!
//! let mut out = vec![];
//! parent.write_out(&mut out)?;
//! assert_eq!(out, plaintext[0]);
//! # Ok(())
//! # }
//! ```

#![doc(html_logo_url = "https://raw.githubusercontent.com/fjall-rs/lsm-tree/main/logo.png")]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/fjall-rs/lsm-tree/main/logo.png")]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

/// Single fixed-length block encode/decode/verify against a content key (§4.A).
pub mod block;

/// CRC-32 trailer used by the key list region (§6).
pub mod checksum;

/// `Encode`/`Decode` traits for fixed-format on-disk records (§6).
pub mod coding;

/// Engine-wide tunables (§10 ambient stack).
pub mod config;

/// Per-cross-segment state machine (§4.E).
pub mod cross_segment;

/// The typed error hierarchy (§7).
mod error;

/// The collaborator bundle a segment or cross-segment borrows per call.
pub mod env;

/// The FEC codec contract plus a reference Cauchy-matrix implementation (§6).
pub mod fec;

/// The lifecycle-callback collaborator (§6).
pub mod fetcher;

/// Atomic file rewrite helper, mirrored from this codebase's own `fs.rs`.
pub mod fs;

/// The re-insertion ("healing") collaborator (§6).
pub mod healer;

/// The memory-bounded decode job queue contract (§5, §6).
pub mod job;

/// The immutable per-segment content-key table (§4.B).
pub mod key_table;

/// The fixed metadata descriptor written once per segment (§6).
pub mod metadata;

/// Parent storage: owns every segment/cross-segment of one splitfile (§4.F).
pub mod parent;

/// The scoped-lock random-access file handle (§4.C).
pub mod raf;

/// Per-segment state machine: the heart of the engine (§3, §4.D).
pub mod segment;

pub use error::{Error, Result};
