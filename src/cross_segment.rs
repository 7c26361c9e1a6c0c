// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Cross-segment storage (§4.E): a secondary, smaller-scale FEC group
//! protecting selected data/cross-check slots across several segments.
//! Mirrors [`crate::segment::Segment`]'s state machine at the scale of `m +
//! c` entries instead of `N` blocks, and has no on-disk footprint of its own
//! — its entries live entirely in memory, backed by the owning segments'
//! already-persisted slots.

use crate::{env::Environment, fec::FecCodec};
use parking_lot::Mutex;
use std::sync::Arc;

/// An unresolved reference to a block owned by some segment (§3).
#[derive(Copy, Clone, Debug)]
pub struct CrossEntry {
    pub segment_index: usize,
    pub block_index: u16,
}

struct Inner {
    bytes: Vec<Option<Vec<u8>>>,
    received_count: usize,
    decoded: bool,
}

/// Holds `m` data entries and `c` check entries. Decodes once `m` of the `m +
/// c` entries have arrived, then hands any reconstructed data entry back to
/// its owning segment.
pub struct CrossSegment {
    pub index: usize,
    entries: Vec<CrossEntry>,
    m: usize,
    c: usize,
    block_size: usize,
    inner: Mutex<Inner>,
}

impl CrossSegment {
    #[must_use]
    pub fn new(index: usize, data_entries: Vec<CrossEntry>, check_entries: Vec<CrossEntry>, block_size: usize) -> Self {
        let m = data_entries.len();
        let c = check_entries.len();
        let mut entries = data_entries;
        entries.extend(check_entries);

        Self {
            index,
            entries,
            m,
            c,
            block_size,
            inner: Mutex::new(Inner {
                bytes: vec![None; m + c],
                received_count: 0,
                decoded: false,
            }),
        }
    }

    /// Total number of entries (`m + c`); the valid range of `entry_index`.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The entry at `entry_index`, for registration against its owning segment.
    #[must_use]
    pub fn entry_at(&self, entry_index: usize) -> CrossEntry {
        self.entries[entry_index]
    }

    #[must_use]
    pub fn is_decoded(&self) -> bool {
        self.inner.lock().decoded
    }

    /// `on_fetched_relevant_block` (§4.E): records that entry `entry_index`
    /// just arrived (carrying its already-verified plaintext), and runs the
    /// decode-and-redistribute protocol once `m` entries are in.
    pub fn on_fetched_relevant_block(self_arc: &Arc<CrossSegment>, entry_index: usize, bytes: Vec<u8>, env: &Arc<dyn Environment>) {
        let cs = self_arc.as_ref();
        {
            let mut inner = cs.inner.lock();
            if inner.decoded || inner.bytes[entry_index].is_some() {
                return;
            }
            inner.bytes[entry_index] = Some(bytes);
            inner.received_count += 1;
            if inner.received_count < cs.m {
                return;
            }
        }
        cs.run_decode(env);
    }

    fn run_decode(&self, env: &Arc<dyn Environment>) {
        let (mut data, mut check, data_present, check_present) = {
            let inner = self.inner.lock();
            if inner.decoded {
                return;
            }

            let mut data = vec![vec![0u8; self.block_size]; self.m];
            let mut check = vec![vec![0u8; self.block_size]; self.c];
            let mut data_present = vec![false; self.m];
            let mut check_present = vec![false; self.c];

            for i in 0..self.m {
                if let Some(bytes) = &inner.bytes[i] {
                    data[i] = bytes.clone();
                    data_present[i] = true;
                }
            }
            for j in 0..self.c {
                if let Some(bytes) = &inner.bytes[self.m + j] {
                    check[j] = bytes.clone();
                    check_present[j] = true;
                }
            }

            (data, check, data_present, check_present)
        };

        if data_present.iter().any(|p| !p)
            && env
                .fec()
                .decode(&mut data, &mut check, &data_present, &check_present, self.block_size)
                .is_err()
        {
            // Not enough entries yet to solve the system; wait for more.
            return;
        }

        {
            let mut inner = self.inner.lock();
            if inner.decoded {
                return;
            }
            inner.decoded = true;
        }

        // Redistribute every newly-decoded data entry to its owning segment
        // (§4.E "hands reconstructed blocks back"). Segments that were
        // already present skip the write in `on_decoded_block`.
        for (i, was_present) in data_present.iter().enumerate() {
            if *was_present {
                continue;
            }
            let entry = self.entries[i];
            env.deliver_decoded_block(entry.segment_index, entry.block_index, data[i].clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fec::CauchyFec,
        fetcher::RecordingFetcher,
        healer::RecordingHealer,
        job::{InlineJobRunner, JobRunner},
        raf::RafHandle,
    };
    use std::sync::Mutex as StdMutex;

    struct TestEnv {
        raf: RafHandle,
        fec: CauchyFec,
        jobs: InlineJobRunner,
        healer: RecordingHealer,
        fetcher: RecordingFetcher,
        delivered: StdMutex<Vec<(usize, u16, Vec<u8>)>>,
    }

    impl Environment for TestEnv {
        fn raf(&self) -> &RafHandle {
            &self.raf
        }
        fn fec(&self) -> &dyn FecCodec {
            &self.fec
        }
        fn job_runner(&self) -> &dyn JobRunner {
            &self.jobs
        }
        fn healer(&self) -> &dyn crate::healer::Healer {
            &self.healer
        }
        fn fetcher(&self) -> &dyn crate::fetcher::Fetcher {
            &self.fetcher
        }
        fn notify_cross_segment(&self, _cross_index: usize, _entry_index: usize, _bytes: Vec<u8>) {}
        fn deliver_decoded_block(&self, segment_index: usize, block_number: u16, bytes: Vec<u8>) {
            self.delivered.lock().unwrap().push((segment_index, block_number, bytes));
        }
        fn fail_on_disk_error(&self, _err: &crate::Error) {}
    }

    fn test_env(dir: &tempfile::TempDir) -> Arc<TestEnv> {
        Arc::new(TestEnv {
            raf: RafHandle::open(&dir.path().join("raf.bin")).unwrap(),
            fec: CauchyFec::new(),
            jobs: InlineJobRunner::new(16 * 1024 * 1024),
            healer: RecordingHealer::new(),
            fetcher: RecordingFetcher::new(),
            delivered: StdMutex::new(vec![]),
        })
    }

    #[test]
    fn decodes_and_redistributes_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let typed_env = test_env(&dir);
        let env: Arc<dyn Environment> = typed_env.clone();

        let block_size = 32;
        let data: Vec<Vec<u8>> = vec![vec![1u8; block_size], vec![2u8; block_size]];
        let mut check = vec![vec![0u8; block_size]];
        CauchyFec::new().encode(&data, &mut check, block_size).unwrap();

        let data_entries = vec![
            CrossEntry { segment_index: 0, block_index: 0 },
            CrossEntry { segment_index: 1, block_index: 0 },
        ];
        let check_entries = vec![CrossEntry { segment_index: 2, block_index: 0 }];

        let cs = Arc::new(CrossSegment::new(0, data_entries, check_entries, block_size));

        // Entry 1 (the second data entry) never arrives; entry 0 and the
        // check entry do.
        CrossSegment::on_fetched_relevant_block(&cs, 0, data[0].clone(), &env);
        assert!(!cs.is_decoded());
        CrossSegment::on_fetched_relevant_block(&cs, 2, check[0].clone(), &env);

        assert!(cs.is_decoded());

        // Entry 1 is owned by segment 1, block 0; redistribution must have
        // delivered the reconstructed bytes there via `deliver_decoded_block`.
        let delivered = typed_env.delivered.lock().unwrap();
        assert_eq!(*delivered, vec![(1, 0, data[1].clone())]);
    }

    #[test]
    fn already_complete_group_does_not_redistribute() {
        let dir = tempfile::tempdir().unwrap();
        let typed_env = test_env(&dir);
        let env: Arc<dyn Environment> = typed_env.clone();

        let block_size = 16;
        let data_entries = vec![CrossEntry { segment_index: 0, block_index: 0 }];
        let cs = Arc::new(CrossSegment::new(0, data_entries, vec![], block_size));

        CrossSegment::on_fetched_relevant_block(&cs, 0, vec![7u8; block_size], &env);
        assert!(cs.is_decoded());
        assert!(typed_env.delivered.lock().unwrap().is_empty(), "the only entry arrived directly, nothing to redistribute");
    }
}
