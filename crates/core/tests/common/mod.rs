//! Shared helpers for the replay integration suites

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtm_replay_core::{DeviceRing, GridDims, Phase, ReplayEngine};

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `count` random frames of `dims`, reproducible from `seed`
pub fn random_frames(dims: GridDims, count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (0..dims.volume())
                .map(|_| rng.random_range(-1.0_f32..1.0))
                .collect()
        })
        .collect()
}

/// Host bytes that hold exactly `frames` frames of `dims`
pub fn frames_to_bytes(dims: GridDims, frames: usize) -> usize {
    frames * dims.volume() * std::mem::size_of::<f32>()
}

/// Run a forward sweep that places `frames[t]` in the ring before saving `t`
pub fn save_all<R: DeviceRing>(engine: &mut ReplayEngine<R>, frames: &[Vec<f32>]) {
    engine.reset_grid(Phase::Forward).unwrap();
    engine.device_mut().write_slot(0, &frames[0]).unwrap();
    for (t, _) in frames.iter().enumerate() {
        let lease = engine.save_forward(t).unwrap();
        if let Some(next) = frames.get(t + 1) {
            engine.device_mut().write_slot(lease.next.slot, next).unwrap();
        }
    }
}

/// Run a backward sweep, returning every replayed frame indexed by time step
pub fn replay_all<R: DeviceRing>(engine: &mut ReplayEngine<R>, count: usize) -> Vec<Vec<f32>> {
    engine.reset_grid(Phase::Backward).unwrap();
    let mut replayed = vec![Vec::new(); count];
    for t in (0..count).rev() {
        let lease = engine.fetch_forward(t).unwrap();
        assert_eq!(lease.time_step, t);
        replayed[t] = engine.forward_frame().unwrap().into_owned();
    }
    replayed
}

/// Assert bit-identical frames
pub fn assert_bit_exact(expected: &[Vec<f32>], actual: &[Vec<f32>]) {
    assert_eq!(expected.len(), actual.len());
    for (t, (e, a)) in expected.iter().zip(actual).enumerate() {
        assert_eq!(e.len(), a.len(), "frame {t} length");
        for (i, (x, y)) in e.iter().zip(a).enumerate() {
            assert_eq!(x.to_bits(), y.to_bits(), "frame {t} sample {i}: {x} vs {y}");
        }
    }
}
