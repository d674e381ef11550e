//! Replay round-trip suite
//!
//! Drives full forward/backward sweeps through the engine and checks that every
//! replayed frame matches what was saved, across tier sizes, codecs and
//! failure modes.

mod common;

use std::fs;

use approx::assert_abs_diff_eq;
use common::{assert_bit_exact, frames_to_bytes, random_frames, replay_all, save_all};
use rtm_replay_core::{
    DeviceRing, EquationOrder, GridDims, Phase, ReplayConfig, ReplayEngine, ReplayError, Tier,
};

fn first_order(dir: &std::path::Path, device_frames: usize) -> ReplayConfig {
    ReplayConfig::new(dir)
        .with_device_frames(device_frames)
        .with_equation_order(EquationOrder::First)
}

#[test]
fn test_four_slot_ring_with_two_segments() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(5, 3);
    // 16 frames wanted, room for 8: H = 8, R = 2
    let config = first_order(dir.path(), 4).with_host_memory_limit(frames_to_bytes(dims, 8));
    let mut engine = ReplayEngine::open(config, dims, 15).unwrap();
    let frames = random_frames(dims, 16, 1);

    save_all(&mut engine, &frames);
    let layout = engine.replay_layout().unwrap();
    assert_eq!(layout.host_frames(), 8);
    assert_eq!(layout.ratio(), 2);
    assert!(!engine.is_host_memory_sufficient());
    assert_eq!(engine.stats().device_to_host, 4);
    assert_eq!(engine.stats().segment_writes, 2);
    assert!(dir.path().join("segment_0.bin").exists());
    assert!(dir.path().join("segment_1.bin").exists());

    engine.reset_grid(Phase::Backward).unwrap();
    let mut replayed = vec![Vec::new(); 16];
    for t in (0..16).rev() {
        engine.fetch_forward(t).unwrap();
        // Segment 1 is read by the first fetch, segment 0 at the 7 boundary
        let expected_reads = if t >= 8 { 1 } else { 2 };
        assert_eq!(engine.stats().segment_reads, expected_reads, "t = {t}");
        replayed[t] = engine.forward_frame().unwrap().into_owned();
    }
    assert_eq!(engine.stats().host_to_device, 4);
    assert_bit_exact(&frames, &replayed);
}

#[test]
fn test_trailing_segment_partition() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(4, 2);
    let config = first_order(dir.path(), 100).with_host_memory_limit(frames_to_bytes(dims, 100));
    let mut engine = ReplayEngine::open(config, dims, 256).unwrap();
    let frames = random_frames(dims, 257, 2);

    save_all(&mut engine, &frames);
    let layout = engine.replay_layout().unwrap();
    assert_eq!(layout.segment_sizes(), vec![100, 100, 57]);
    assert_eq!(layout.segment_of(250), 2);
    assert_eq!(layout.segment_offset(250), 50);

    let trailing = fs::metadata(dir.path().join("segment_2.bin")).unwrap();
    assert_eq!(trailing.len() as usize, frames_to_bytes(dims, 57));

    let replayed = replay_all(&mut engine, 257);
    assert_bit_exact(&frames, &replayed);
}

#[test]
fn test_whole_run_fits_one_segment() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::new(3, 2, 2);
    let mut engine = ReplayEngine::open(first_order(dir.path(), 4), dims, 9).unwrap();
    let frames = random_frames(dims, 10, 3);

    save_all(&mut engine, &frames);
    assert!(engine.is_host_memory_sufficient());
    assert_eq!(engine.host_frames(), Some(12));
    assert_eq!(engine.stats().segment_writes, 1);

    let replayed = replay_all(&mut engine, 10);
    assert_eq!(engine.stats().segment_reads, 1);
    assert_bit_exact(&frames, &replayed);
}

#[test]
fn test_second_order_lease_exposes_previous_frame() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(4, 4);
    let config = ReplayConfig::new(dir.path()).with_device_frames(3);
    let mut engine = ReplayEngine::open(config, dims, 11).unwrap();
    let frames = random_frames(dims, 12, 4);

    engine.reset_grid(Phase::Forward).unwrap();
    engine.device_mut().write_slot(0, &frames[0]).unwrap();
    for t in 0..12 {
        let lease = engine.save_forward(t).unwrap();
        let view = engine.step_view(&lease).unwrap();
        assert_eq!(view.current, frames[t].as_slice());
        let previous = view.previous.expect("second order leases the previous slot");
        if t == 0 {
            assert!(previous.iter().all(|&v| v == 0.0));
        } else {
            assert_eq!(previous, frames[t - 1].as_slice());
        }
        if t < 11 {
            view.next.copy_from_slice(&frames[t + 1]);
        }
    }

    let replayed = replay_all(&mut engine, 12);
    assert_bit_exact(&frames, &replayed);
}

#[test]
fn test_engine_is_reused_across_shots() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(6, 2);
    let config = first_order(dir.path(), 4).with_host_memory_limit(frames_to_bytes(dims, 8));
    let mut engine = ReplayEngine::open(config, dims, 19).unwrap();

    for shot in 0..3 {
        let frames = random_frames(dims, 20, 100 + shot);
        save_all(&mut engine, &frames);
        assert_eq!(engine.host_frames(), Some(8));
        assert_eq!(engine.stats().segment_writes, 3);
        let replayed = replay_all(&mut engine, 20);
        assert_eq!(engine.stats().segment_reads, 3);
        assert_bit_exact(&frames, &replayed);
    }
}

#[test]
fn test_backward_replay_can_be_repeated() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(3, 3);
    let config = first_order(dir.path(), 2).with_host_memory_limit(frames_to_bytes(dims, 4));
    let mut engine = ReplayEngine::open(config, dims, 8).unwrap();
    let frames = random_frames(dims, 9, 5);

    save_all(&mut engine, &frames);
    let first = replay_all(&mut engine, 9);
    let second = replay_all(&mut engine, 9);
    assert_bit_exact(&frames, &first);
    assert_bit_exact(&frames, &second);
}

#[test]
fn test_backward_cursor_rejects_skips_and_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(2, 2);
    let mut engine = ReplayEngine::open(first_order(dir.path(), 2), dims, 5).unwrap();
    save_all(&mut engine, &random_frames(dims, 6, 6));

    engine.reset_grid(Phase::Backward).unwrap();
    let err = engine.fetch_forward(4).unwrap_err();
    assert!(matches!(
        err,
        ReplayError::OutOfOrder { phase: Phase::Backward, expected: 5, requested: 4 }
    ));
    assert_eq!(err.tier(), Tier::Cursor);

    engine.fetch_forward(5).unwrap();
    assert!(engine.fetch_forward(5).is_err());
    assert!(engine.fetch_forward(6).is_err());
    assert!(matches!(
        engine.save_forward(0),
        Err(ReplayError::WrongPhase { expected: Phase::Forward, .. })
    ));
}

#[test]
fn test_forward_frame_requires_a_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(2, 2);
    let mut engine = ReplayEngine::open(first_order(dir.path(), 2), dims, 3).unwrap();
    save_all(&mut engine, &random_frames(dims, 4, 7));
    assert!(engine.forward_frame().is_err());
    engine.reset_grid(Phase::Backward).unwrap();
    assert!(engine.forward_frame().is_err());
}

#[test]
fn test_absolute_tolerance_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::new(6, 4, 9);
    let tolerance = 1e-3;
    let config = first_order(dir.path(), 4)
        .with_absolute_tolerance(tolerance)
        .with_host_memory_limit(frames_to_bytes(dims, 8));
    let mut engine = ReplayEngine::open(config, dims, 20).unwrap();
    assert_eq!(engine.codec_name(), "lossy-absolute");
    let frames = random_frames(dims, 21, 8);

    save_all(&mut engine, &frames);
    let replayed = replay_all(&mut engine, 21);
    for (expected, actual) in frames.iter().zip(&replayed) {
        for (&e, &a) in expected.iter().zip(actual) {
            assert_abs_diff_eq!(e, a, epsilon = tolerance);
        }
    }
}

#[test]
fn test_relative_tolerance_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(32, 10);
    let tolerance = 1e-4;
    let config = first_order(dir.path(), 4)
        .with_relative_tolerance(tolerance)
        .with_parallel_compression(false);
    let mut engine = ReplayEngine::open(config, dims, 11).unwrap();
    let frames: Vec<Vec<f32>> = random_frames(dims, 12, 9)
        .into_iter()
        .map(|f| f.into_iter().map(|v| v * 1e3).collect())
        .collect();

    save_all(&mut engine, &frames);
    let replayed = replay_all(&mut engine, 12);
    for (expected, actual) in frames.iter().zip(&replayed) {
        for (&e, &a) in expected.iter().zip(actual) {
            assert!((e - a).abs() <= tolerance * e.abs(), "{e} vs {a}");
        }
    }
}

#[test]
fn test_resident_run_skips_disk() {
    let dir = tempfile::tempdir().unwrap();
    let segments = dir.path().join("segments");
    let dims = GridDims::planar(4, 3);
    let config = first_order(&segments, 4).with_keep_resident(true);
    let mut engine = ReplayEngine::open(config, dims, 13).unwrap();
    let frames = random_frames(dims, 14, 10);

    save_all(&mut engine, &frames);
    assert!(engine.is_resident());
    assert_eq!(engine.stats().segment_writes, 0);
    assert!(!segments.exists());

    let replayed = replay_all(&mut engine, 14);
    assert_eq!(engine.stats().segment_reads, 0);
    assert_bit_exact(&frames, &replayed);
}

#[test]
fn test_resident_needs_the_whole_run() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(4, 3);
    let config = first_order(dir.path(), 4)
        .with_keep_resident(true)
        .with_host_memory_limit(frames_to_bytes(dims, 8));
    let mut engine = ReplayEngine::open(config, dims, 15).unwrap();
    let frames = random_frames(dims, 16, 11);

    save_all(&mut engine, &frames);
    assert!(!engine.is_resident());
    assert_eq!(engine.stats().segment_writes, 2);
    assert_bit_exact(&frames, &replay_all(&mut engine, 16));
}

#[test]
fn test_missing_segment_fails_on_segment_tier() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(3, 2);
    let config = first_order(dir.path(), 4).with_host_memory_limit(frames_to_bytes(dims, 8));
    let mut engine = ReplayEngine::open(config, dims, 15).unwrap();
    save_all(&mut engine, &random_frames(dims, 16, 12));

    fs::remove_file(dir.path().join("segment_1.bin")).unwrap();
    engine.reset_grid(Phase::Backward).unwrap();
    let err = engine.fetch_forward(15).unwrap_err();
    assert_eq!(err.tier(), Tier::Segment);
    assert!(matches!(err, ReplayError::Segment { segment: 1, time_step: 15, .. }));
}

#[test]
fn test_truncated_segment_fails_on_codec_tier() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(8, 8);
    let config = first_order(dir.path(), 4).with_absolute_tolerance(1e-2);
    let mut engine = ReplayEngine::open(config, dims, 7).unwrap();
    save_all(&mut engine, &random_frames(dims, 8, 13));

    let path = dir.path().join("segment_0.bin");
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    engine.reset_grid(Phase::Backward).unwrap();
    let err = engine.fetch_forward(7).unwrap_err();
    assert_eq!(err.tier(), Tier::Codec);
    assert!(err.to_string().contains("time step 7"));
}

#[test]
fn test_trailing_bytes_fail_on_codec_tier() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(2, 2);
    let mut engine = ReplayEngine::open(first_order(dir.path(), 2), dims, 3).unwrap();
    save_all(&mut engine, &random_frames(dims, 4, 14));

    let path = dir.path().join("segment_0.bin");
    let mut bytes = fs::read(&path).unwrap();
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    fs::write(&path, bytes).unwrap();

    engine.reset_grid(Phase::Backward).unwrap();
    let err = engine.fetch_forward(3).unwrap_err();
    assert!(matches!(err, ReplayError::Codec { segment: 0, time_step: 3, .. }));
}

#[test]
fn test_allocation_exhausted_below_one_device_block() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(4, 4);
    let config = first_order(dir.path(), 4).with_host_memory_limit(frames_to_bytes(dims, 3));
    let mut engine = ReplayEngine::open(config, dims, 15).unwrap();
    let err = engine.reset_grid(Phase::Forward).unwrap_err();
    assert_eq!(err.tier(), Tier::Allocation);
    assert!(matches!(err, ReplayError::AllocationExhausted { floor: 4, frame_len: 16 }));
}

#[test]
fn test_reserve_headroom_halves_once_more() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(3, 3);
    let config = first_order(dir.path(), 4)
        .with_host_memory_limit(frames_to_bytes(dims, 8))
        .with_reserve_headroom(true);
    let mut engine = ReplayEngine::open(config, dims, 15).unwrap();
    let frames = random_frames(dims, 16, 15);

    save_all(&mut engine, &frames);
    assert_eq!(engine.host_frames(), Some(4));
    assert_eq!(engine.stats().segment_writes, 4);
    assert_bit_exact(&frames, &replay_all(&mut engine, 16));
}

#[test]
fn test_stale_segments_are_cleared_and_close_removes_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("segment_9.bin"), b"stale").unwrap();
    let dims = GridDims::planar(2, 2);
    let mut engine = ReplayEngine::open(first_order(dir.path(), 2), dims, 3).unwrap();

    save_all(&mut engine, &random_frames(dims, 4, 16));
    assert!(!dir.path().join("segment_9.bin").exists());
    assert!(dir.path().join("segment_0.bin").exists());

    engine.close().unwrap();
    assert!(!dir.path().join("segment_0.bin").exists());
}

#[test]
fn test_auto_selected_ring_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(16, 4);
    let config = first_order(dir.path(), 4).with_host_memory_limit(frames_to_bytes(dims, 8));
    let mut engine = ReplayEngine::open_auto(config, dims, 12).unwrap();
    assert_eq!(engine.device().slots(), 4);
    let frames = random_frames(dims, 13, 17);

    save_all(&mut engine, &frames);
    assert_bit_exact(&frames, &replay_all(&mut engine, 13));
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dims = GridDims::planar(2, 2);
    let config = ReplayConfig::new(dir.path()).with_device_frames(2);
    let err = ReplayEngine::open(config, dims, 3).err().unwrap();
    assert_eq!(err.tier(), Tier::Config);
}
