// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tunables for the fetch storage engine (§10 ambient stack).

/// Standard block payload size in bytes (`L`).
pub const BLOCK_SIZE: usize = 32_768;

/// On-disk format version written by [`crate::metadata::FixedMetadata`].
pub const VERSION: u16 = 1;

/// Bounded-probe limit used by deterministic cross-block allocation.
///
/// Preserved bit-for-bit for wire compatibility with existing splitfiles.
pub const CROSS_BLOCK_PROBE_BOUND: usize = 10;

/// Engine-wide configuration.
///
/// Mirrors the shape of this codebase's other `Config` builders: plain public
/// fields, a documented [`Default`], and `#[must_use]` chainable setters.
#[derive(Clone, Debug)]
pub struct Config {
    /// Payload size of a single block, in bytes.
    pub block_size: usize,

    /// Whether per-block retry counters are tracked in the status region.
    pub track_retries: bool,

    /// Memory budget, in bytes, the decode job runner must respect.
    pub decode_memory_budget: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            track_retries: true,
            // 256 MiB: enough for a handful of concurrent segment decodes
            // at the standard block size without the job runner admitting
            // an unbounded number of them.
            decode_memory_budget: 256 * 1_024 * 1_024,
        }
    }
}

impl Config {
    /// Creates a config with the default tunables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the block payload size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Enables or disables per-block retry counters.
    #[must_use]
    pub fn with_retry_tracking(mut self, track_retries: bool) -> Self {
        self.track_retries = track_retries;
        self
    }

    /// Overrides the decode job runner's memory budget.
    #[must_use]
    pub fn with_decode_memory_budget(mut self, bytes: usize) -> Self {
        self.decode_memory_budget = bytes;
        self
    }
}
