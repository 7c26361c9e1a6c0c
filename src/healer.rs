// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The healer collaborator (§6): fire-and-forget re-insertion of a
//! reconstructed block back into the network so future fetchers find it.

use crate::block::{CryptoAlgo, CryptoKey};

/// Receives reconstructed blocks that were previously requested (`tried`) but
/// never arrived, for re-insertion.
pub trait Healer: Send + Sync {
    /// Queues `bytes` (the block's plaintext) for re-encryption and
    /// re-insertion under `crypto_key`/`crypto_algo`. Never blocks and never
    /// fails observably to the caller.
    fn queue_heal(&self, bytes: Vec<u8>, crypto_key: CryptoKey, crypto_algo: CryptoAlgo);
}

/// A [`Healer`] that records every queued block, for use in tests.
#[derive(Default)]
pub struct RecordingHealer {
    healed: parking_lot::Mutex<Vec<Vec<u8>>>,
}

impl RecordingHealer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every block queued for healing so far.
    #[must_use]
    pub fn healed(&self) -> Vec<Vec<u8>> {
        self.healed.lock().clone()
    }
}

impl Healer for RecordingHealer {
    fn queue_heal(&self, bytes: Vec<u8>, _crypto_key: CryptoKey, _crypto_algo: CryptoAlgo) {
        self.healed.lock().push(bytes);
    }
}
