use super::*;
use crate::{
    block::{self, BlockKey, CryptoAlgo, CryptoKey},
    env::Environment,
    fec::{CauchyFec, FecCodec},
    fetcher::RecordingFetcher,
    healer::RecordingHealer,
    job::{InlineJobRunner, JobRunner},
    key_table::SegmentKeyTable,
    raf::RafHandle,
};
use std::sync::Arc;

struct TestEnv {
    raf: RafHandle,
    fec: CauchyFec,
    jobs: InlineJobRunner,
    healer: RecordingHealer,
    fetcher: RecordingFetcher,
}

impl TestEnv {
    fn new(raf: RafHandle) -> Self {
        Self {
            raf,
            fec: CauchyFec::new(),
            jobs: InlineJobRunner::new(64 * 1024 * 1024),
            healer: RecordingHealer::new(),
            fetcher: RecordingFetcher::new(),
        }
    }
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

    fn deliver_decoded_block(&self, _segment_index: usize, _block_number: u16, _bytes: Vec<u8>) {}

    fn fail_on_disk_error(&self, _err: &crate::Error) {}
}

struct Fixture {
    segment: Arc<Segment>,
    env: Arc<dyn Environment>,
    plaintext: Vec<Vec<u8>>,
    ciphertexts: Vec<block::CiphertextBlock>,
    content_keys: Vec<block::ContentKey>,
}

fn build_fixture(dir: &tempfile::TempDir, d: u32, x: u32, c: u32, block_size: usize, track_retries: bool) -> Fixture {
    let m = (d + x) as usize;
    let n = (d + x + c) as usize;

    let data: Vec<Vec<u8>> = (0..m).map(|i| vec![(i * 17 + 1) as u8; block_size]).collect();
    let mut check: Vec<Vec<u8>> = vec![vec![0u8; block_size]; c as usize];
    if c > 0 {
        CauchyFec::new().encode(&data, &mut check, block_size).unwrap();
    }

    let mut plaintext = data;
    plaintext.extend(check);

    let mut keys = Vec::with_capacity(n);
    let mut ciphertexts = Vec::with_capacity(n);
    let mut content_keys = Vec::with_capacity(n);

    for (i, bytes) in plaintext.iter().enumerate() {
        let crypto = CryptoKey::from_bytes([(i + 1) as u8; 32]);
        let (ciphertext, content) = block::encode(bytes, &crypto, CryptoAlgo::Blake3Keystream);
        keys.push(BlockKey {
            content,
            crypto,
            algo: CryptoAlgo::Blake3Keystream,
        });
        content_keys.push(content);
        ciphertexts.push(ciphertext);
    }

    let table = SegmentKeyTable::new(keys);
    let status_len = StatusRegion::encoded_len(m, n, track_retries) as u64;
    let offsets = SegmentOffsets {
        block_data: 0,
        status: (m * block_size) as u64,
        key_list: (m * block_size) as u64 + status_len,
    };

    let segment = Arc::new(Segment::new(0, d, x, c, block_size, track_retries, offsets, table));

    let raf = RafHandle::open(&dir.path().join("raf.bin")).unwrap();
    let env: Arc<dyn Environment> = Arc::new(TestEnv::new(raf));
    segment.write_initial_key_list(env.as_ref()).unwrap();

    Fixture {
        segment,
        env,
        plaintext,
        ciphertexts,
        content_keys,
    }
}

#[test]
fn decode_reconstructs_missing_data_block() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(&dir, 3, 0, 3, 64, true);

    // Deliver data block 0, data block 2, and check block 1 (global index 4);
    // the engine must reconstruct data block 1.
    for &b in &[0usize, 2, 4] {
        let accepted = Segment::on_got_key(&fx.segment, &fx.content_keys[b], fx.ciphertexts[b].clone(), &fx.env);
        assert!(accepted, "block {b} should have been accepted");
    }

    assert!(fx.segment.is_succeeded());
    assert!(fx.segment.is_finished());

    let mut out = vec![];
    fx.segment.write_to(&mut out, fx.env.as_ref()).unwrap();
    let expected: Vec<u8> = fx.plaintext[0..3].concat();
    assert_eq!(out, expected);
}

#[test]
fn duplicate_delivery_is_accepted_once() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(&dir, 3, 0, 0, 32, true);

    let first = Segment::on_got_key(&fx.segment, &fx.content_keys[0], fx.ciphertexts[0].clone(), &fx.env);
    let second = Segment::on_got_key(&fx.segment, &fx.content_keys[0], fx.ciphertexts[0].clone(), &fx.env);

    assert!(first);
    assert!(!second);
    assert_eq!(fx.segment.present_count(), 1);
}

#[test]
fn unmatched_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(&dir, 2, 0, 0, 32, true);

    let foreign_plaintext = vec![0xEEu8; 32];
    let foreign_key = CryptoKey::from_bytes([0xFF; 32]);
    let (ciphertext, content) = block::encode(&foreign_plaintext, &foreign_key, CryptoAlgo::Blake3Keystream);

    let accepted = Segment::on_got_key(&fx.segment, &content, ciphertext, &fx.env);
    assert!(!accepted);
    assert_eq!(fx.segment.present_count(), 0);
}

#[test]
fn single_data_block_segment_decodes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(&dir, 1, 0, 0, 32, true);

    let accepted = Segment::on_got_key(&fx.segment, &fx.content_keys[0], fx.ciphertexts[0].clone(), &fx.env);
    assert!(accepted);
    assert!(fx.segment.is_succeeded());
}

#[test]
fn below_threshold_never_triggers_decode() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(&dir, 3, 0, 2, 32, true);

    Segment::on_got_key(&fx.segment, &fx.content_keys[0], fx.ciphertexts[0].clone(), &fx.env);
    Segment::on_got_key(&fx.segment, &fx.content_keys[1], fx.ciphertexts[1].clone(), &fx.env);

    assert!(!fx.segment.is_succeeded());
    assert_eq!(fx.segment.present_count(), 2);
}

#[test]
fn retry_counters_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(&dir, 2, 0, 0, 32, true);

    for _ in 0..8 {
        fx.segment.on_non_fatal_failure(1, fx.env.as_ref());
    }

    assert_eq!(fx.segment.retries_of(1), 8);
    assert!(fx.segment.tried(1));
}

#[test]
fn rejected_decode_job_resets_in_flight_flag_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(&dir, 1, 0, 0, 32, true);

    // A runner with zero budget rejects every job it's offered.
    let starved: Arc<dyn Environment> = Arc::new(TestEnv {
        raf: RafHandle::open(&dir.path().join("raf.bin")).unwrap(),
        fec: CauchyFec::new(),
        jobs: InlineJobRunner::new(0),
        healer: RecordingHealer::new(),
        fetcher: RecordingFetcher::new(),
    });

    let accepted = Segment::on_got_key(&fx.segment, &fx.content_keys[0], fx.ciphertexts[0].clone(), &starved);
    assert!(accepted, "the commit itself succeeds even though the decode job is starved");
    assert!(!fx.segment.is_succeeded(), "the decode job was rejected, so it never ran");

    // A stuck `decode_in_flight` flag would make this return `false` forever.
    assert!(Segment::try_start_decode(&fx.segment, &fx.env));
    assert!(fx.segment.is_succeeded());
}

#[test]
fn status_region_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(&dir, 3, 0, 2, 32, true);

    Segment::on_got_key(&fx.segment, &fx.content_keys[0], fx.ciphertexts[0].clone(), &fx.env);
    fx.segment.on_non_fatal_failure(1, fx.env.as_ref());

    // Only the status region is exercised here; the key table is irrelevant
    // to `load_status`, so placeholder keys stand in for the real ones.
    let placeholder_keys = (0..5)
        .map(|i| {
            let crypto = CryptoKey::from_bytes([i as u8; 32]);
            let (_, content) = block::encode(&[0u8; 32], &crypto, CryptoAlgo::Blake3Keystream);
            BlockKey {
                content,
                crypto,
                algo: CryptoAlgo::Blake3Keystream,
            }
        })
        .collect();

    let reloaded = Segment::new(
        0,
        3,
        0,
        2,
        32,
        true,
        SegmentOffsets {
            block_data: 0,
            status: (3 * 32) as u64,
            key_list: (3 * 32) as u64 + StatusRegion::encoded_len(3, 5, true) as u64,
        },
        SegmentKeyTable::new(placeholder_keys),
    );
    reloaded.load_status(fx.env.as_ref()).unwrap();

    assert_eq!(reloaded.present_count(), 1);
    assert_eq!(reloaded.retries_of(1), 1);
    assert!(reloaded.tried(1));
}
