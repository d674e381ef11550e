//! On-disk segment layout
//!
//! Raw segments are bare native-endian `f32` frames. Lossy segments are, per
//! frame, a run of `(usize length, payload)` blocks whose count follows from
//! the grid depth and block size.

mod common;

use std::fs;

use common::{frames_to_bytes, random_frames, save_all};
use rtm_replay_core::{EquationOrder, GridDims, ReplayConfig, ReplayEngine};

#[test]
fn test_raw_segment_is_concatenated_frames() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(5, 4);
    let config = ReplayConfig::new(dir.path())
        .with_device_frames(2)
        .with_equation_order(EquationOrder::First)
        .with_host_memory_limit(frames_to_bytes(dims, 5));
    let mut engine = ReplayEngine::open(config, dims, 9).unwrap();
    let frames = random_frames(dims, 10, 21);
    save_all(&mut engine, &frames);

    // H = 4: segments hold frames 0..4, 4..8 and the trailing 8..10
    let first = fs::read(dir.path().join("segment_0.bin")).unwrap();
    let trailing = fs::read(dir.path().join("segment_2.bin")).unwrap();
    assert_eq!(first.len(), frames_to_bytes(dims, 4));
    assert_eq!(trailing.len(), frames_to_bytes(dims, 2));

    let expected: Vec<u8> = frames[8..]
        .iter()
        .flatten()
        .flat_map(|v| v.to_ne_bytes())
        .collect();
    assert_eq!(trailing, expected);
}

#[test]
fn test_lossy_segment_block_records() {
    let dir = tempfile::tempdir().unwrap();
    // nz = 10 with 4 planes per block: 3 blocks per frame
    let dims = GridDims::new(6, 3, 10);
    let config = ReplayConfig::new(dir.path())
        .with_device_frames(3)
        .with_absolute_tolerance(1e-3);
    let mut engine = ReplayEngine::open(config, dims, 6).unwrap();
    save_all(&mut engine, &random_frames(dims, 7, 22));

    let bytes = fs::read(dir.path().join("segment_0.bin")).unwrap();
    let word = std::mem::size_of::<usize>();
    let mut pos = 0;
    let mut blocks = 0;
    while pos < bytes.len() {
        let len = usize::from_ne_bytes(bytes[pos..pos + word].try_into().unwrap());
        assert!(len > 0, "block {blocks} is empty");
        pos += word + len;
        blocks += 1;
    }
    assert_eq!(pos, bytes.len());
    assert_eq!(blocks, 7 * 3);
    assert_eq!(engine.stats().bytes_written as usize, bytes.len());
}

#[test]
fn test_lossy_segments_are_smaller_for_smooth_fields() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::new(32, 8, 8);
    let config = ReplayConfig::new(dir.path())
        .with_device_frames(4)
        .with_absolute_tolerance(1e-3);
    let mut engine = ReplayEngine::open(config, dims, 7).unwrap();

    let frames: Vec<Vec<f32>> = (0..8)
        .map(|t| {
            (0..dims.volume())
                .map(|i| ((i as f32) * 0.05 + t as f32 * 0.3).sin())
                .collect()
        })
        .collect();
    save_all(&mut engine, &frames);

    let raw_bytes = frames_to_bytes(dims, 8) as u64;
    let ratio = engine.stats().compression_ratio(raw_bytes).unwrap();
    assert!(ratio > 1.5, "compression ratio {ratio}");
}
