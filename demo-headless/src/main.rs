use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use rtm_replay_core::{
    DeviceRing, EquationOrder, GridDims, Phase, ReplayConfig, ReplayEngine, ReplayError,
    StepLease, Wavefield,
};
use tracing::info;

/// Reverse-time migration replay demo with configurable storage tiers
#[derive(Parser, Debug)]
#[command(name = "rtm-replay-demo")]
#[command(about = "Toy 2D acoustic RTM shot driven through the checkpoint/replay engine", long_about = None)]
struct Args {
    /// Grid samples along x
    #[arg(long, default_value_t = 200)]
    nx: usize,

    /// Grid samples along z
    #[arg(long, default_value_t = 120)]
    nz: usize,

    /// Last forward time step (the run holds steps + 1 frames)
    #[arg(short, long, default_value_t = 999)]
    steps: usize,

    /// Frames held in the device ring
    #[arg(short, long, default_value_t = 100)]
    device_frames: usize,

    /// Host staging limit in MiB (unlimited when omitted)
    #[arg(long, value_parser = parse_memory_mb)]
    host_memory_mb: Option<f64>,

    /// Directory for segment files
    #[arg(long, default_value = "replay-segments")]
    segment_dir: PathBuf,

    /// Enable lossy compression with this error bound
    #[arg(short, long)]
    tolerance: Option<f32>,

    /// Interpret the tolerance as relative precision
    #[arg(long)]
    relative: bool,

    /// Keep the run in host memory when it fits
    #[arg(long)]
    resident: bool,

    /// Halve the host buffer once more after a constrained negotiation
    #[arg(long)]
    headroom: bool,

    /// Use the best available device ring (GPU when present)
    #[arg(long)]
    auto_device: bool,

    /// Number of shots to run through the same engine
    #[arg(long, default_value_t = 1)]
    shots: usize,

    /// Compare every replayed frame against an in-memory copy
    #[arg(short, long)]
    verify: bool,
}

/// Positive, finite MiB count
fn parse_memory_mb(value: &str) -> Result<f64, String> {
    let mb: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if mb.is_finite() && mb > 0.0 {
        Ok(mb)
    } else {
        Err(format!("{value} is not a positive number of MiB"))
    }
}

const COURANT2: f32 = 0.2;

/// `next = 2 current - previous + c^2 laplacian(current)`, zero boundaries
fn stencil(dims: GridDims, next: &mut [f32], current: &[f32], previous: &[f32]) {
    let nx = dims.nx;
    for z in 1..dims.nz - 1 {
        for x in 1..nx - 1 {
            let i = z * nx + x;
            let lap = current[i - 1] + current[i + 1] + current[i - nx] + current[i + nx]
                - 4.0 * current[i];
            next[i] = 2.0 * current[i] - previous[i] + COURANT2 * lap;
        }
    }
}

/// Ricker wavelet peaking at step 30
fn ricker(t: usize) -> f32 {
    let a = (t as f32 - 30.0) / 10.0;
    (1.0 - 2.0 * a * a) * (-a * a).exp()
}

struct Geometry {
    dims: GridDims,
    source: usize,
    receiver_row: usize,
}

impl Geometry {
    fn new(dims: GridDims) -> Self {
        Self {
            dims,
            source: (dims.nz / 8) * dims.nx + dims.nx / 2,
            receiver_row: dims.nz / 8,
        }
    }

    fn receivers(&self) -> impl Iterator<Item = usize> + '_ {
        let row = self.receiver_row * self.dims.nx;
        (1..self.dims.nx - 1).map(move |x| row + x)
    }
}

/// Forward step computed in place through the host ring
fn step_in_ring(
    engine: &mut ReplayEngine,
    lease: &StepLease,
    geometry: &Geometry,
) -> Result<(), ReplayError> {
    let view = engine.step_view(lease)?;
    let previous = view.previous.unwrap_or(view.current);
    stencil(geometry.dims, view.next, view.current, previous);
    view.next[geometry.source] += ricker(lease.time_step + 1);
    Ok(())
}

/// Forward step for rings that live off the host: read, compute, write back
fn step_through_copies<R: DeviceRing>(
    engine: &mut ReplayEngine<R>,
    lease: &StepLease,
    geometry: &Geometry,
    scratch: &mut [f32],
) -> Result<(), ReplayError> {
    let to_replay = |source| ReplayError::Device {
        time_step: lease.time_step,
        source,
    };
    let current = engine
        .device()
        .read_slot(lease.current.slot)
        .map_err(to_replay)?
        .into_owned();
    let previous = match lease.previous {
        Some(p) => engine.device().read_slot(p.slot).map_err(to_replay)?.into_owned(),
        None => current.clone(),
    };
    scratch.fill(0.0);
    stencil(geometry.dims, scratch, &current, &previous);
    scratch[geometry.source] += ricker(lease.time_step + 1);
    engine
        .device_mut()
        .write_slot(lease.next.slot, scratch)
        .map_err(to_replay)
}

/// Result of one shot
struct Shot {
    image: Vec<f32>,
    max_replay_error: Option<f32>,
    elapsed_ms: f64,
}

/// Backward sweep: inject recorded traces, correlate with the replayed field
fn backward_sweep<R: DeviceRing>(
    engine: &mut ReplayEngine<R>,
    field: &mut Wavefield,
    geometry: &Geometry,
    traces: &[Vec<f32>],
    history: Option<&[Vec<f32>]>,
) -> Result<(Vec<f32>, Option<f32>), ReplayError> {
    field.rebind(engine.reset_grid(Phase::Backward)?);
    let mut image = vec![0.0_f32; geometry.dims.volume()];
    let mut max_error = history.map(|_| 0.0_f32);

    for t in (0..traces.len()).rev() {
        engine.fetch_forward(t)?;
        let forward = engine.forward_frame()?;
        for ((pixel, f), b) in image.iter_mut().zip(forward.iter()).zip(&field.current) {
            *pixel += f * b;
        }
        if let (Some(history), Some(max_error)) = (history, max_error.as_mut()) {
            for (a, b) in forward.iter().zip(&history[t]) {
                *max_error = max_error.max((a - b).abs());
            }
        }

        let previous = field.previous.as_deref().unwrap_or(&field.current);
        stencil(geometry.dims, &mut field.next, &field.current, previous);
        for (receiver, sample) in geometry.receivers().zip(&traces[t]) {
            field.next[receiver] += sample;
        }
        field.advance();
    }
    Ok((image, max_error))
}

fn run_shot<R: DeviceRing>(
    engine: &mut ReplayEngine<R>,
    field: &mut Wavefield,
    geometry: &Geometry,
    last_step: usize,
    verify: bool,
    mut step: impl FnMut(&mut ReplayEngine<R>, &StepLease) -> Result<(), ReplayError>,
) -> Result<Shot, ReplayError> {
    let started = Instant::now();
    field.rebind(engine.reset_grid(Phase::Forward)?);

    let mut traces = Vec::with_capacity(last_step + 1);
    let mut history = verify.then(|| Vec::with_capacity(last_step + 1));
    for t in 0..=last_step {
        let lease = engine.save_forward(t)?;
        let current = engine
            .device()
            .read_slot(lease.current.slot)
            .map_err(|source| ReplayError::Device { time_step: t, source })?;
        traces.push(geometry.receivers().map(|r| current[r]).collect::<Vec<_>>());
        if let Some(history) = history.as_mut() {
            history.push(current.into_owned());
        }
        if t < last_step {
            step(engine, &lease)?;
        }
    }

    let (image, max_replay_error) =
        backward_sweep(engine, field, geometry, &traces, history.as_deref())?;
    Ok(Shot {
        image,
        max_replay_error,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}

fn report<R: DeviceRing>(engine: &ReplayEngine<R>, shot_index: usize, shot: &Shot) {
    let energy: f64 = shot.image.iter().map(|&v| f64::from(v).powi(2)).sum();
    println!(
        "Shot {}: {:.1} ms, image energy {:.4e}",
        shot_index + 1,
        shot.elapsed_ms,
        energy
    );
    if let Some(err) = shot.max_replay_error {
        println!("  max replay error: {err:.3e}");
    }
    let stats = engine.stats();
    println!("  {stats}");
    let raw_bytes = engine.replay_layout().map_or(0, |l| l.total_frames())
        * engine.dims().volume()
        * std::mem::size_of::<f32>();
    if let Some(ratio) = stats.compression_ratio(raw_bytes as u64) {
        println!("  compression ratio {ratio:.2}x");
    }
}

fn build_config(args: &Args) -> ReplayConfig {
    let mut config = ReplayConfig::new(&args.segment_dir)
        .with_device_frames(args.device_frames)
        .with_equation_order(EquationOrder::Second)
        .with_keep_resident(args.resident)
        .with_reserve_headroom(args.headroom);
    if let Some(mb) = args.host_memory_mb {
        config = config.with_host_memory_limit((mb * 1024.0 * 1024.0) as usize);
    }
    if let Some(tolerance) = args.tolerance {
        config = if args.relative {
            config.with_relative_tolerance(tolerance)
        } else {
            config.with_absolute_tolerance(tolerance)
        };
    }
    config
}

fn run<R: DeviceRing>(
    mut engine: ReplayEngine<R>,
    args: &Args,
    geometry: &Geometry,
    mut step: impl FnMut(&mut ReplayEngine<R>, &StepLease) -> Result<(), ReplayError>,
) -> Result<(), ReplayError> {
    let mut field = Wavefield::new(geometry.dims, EquationOrder::Second);
    for shot_index in 0..args.shots {
        let shot = run_shot(&mut engine, &mut field, geometry, args.steps, args.verify, &mut step)?;
        if shot_index == 0 {
            let layout = engine.replay_layout();
            println!(
                "Host buffer: {} frames ({}), {} segment(s), codec {}{}",
                engine.host_frames().unwrap_or(0),
                if engine.is_host_memory_sufficient() {
                    "whole run"
                } else {
                    "constrained"
                },
                layout.map_or(0, |l| l.segment_count()),
                engine.codec_name(),
                if engine.is_resident() { ", resident" } else { "" }
            );
        }
        report(&engine, shot_index, &shot);
    }
    engine.close()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    println!("=== RTM Replay Demo ===\n");

    if args.nx < 3 || args.nz < 3 {
        eprintln!("Grid must be at least 3x3");
        std::process::exit(2);
    }
    let dims = GridDims::planar(args.nx, args.nz);
    let geometry = Geometry::new(dims);
    let config = build_config(&args);
    println!(
        "Grid {}x{}, {} frames, device ring {} frames, segments in {}",
        args.nx,
        args.nz,
        args.steps + 1,
        args.device_frames,
        args.segment_dir.display()
    );

    let result = if args.auto_device {
        ReplayEngine::open_auto(config, dims, args.steps).and_then(|engine| {
            info!(gpu = engine.device().is_gpu_accelerated(), "Device ring selected");
            let mut scratch = vec![0.0; dims.volume()];
            run(engine, &args, &geometry, |engine, lease| {
                step_through_copies(engine, lease, &geometry, &mut scratch)
            })
        })
    } else {
        ReplayEngine::open(config, dims, args.steps).and_then(|engine| {
            run(engine, &args, &geometry, |engine, lease| {
                step_in_ring(engine, lease, &geometry)
            })
        })
    };

    if let Err(err) = result {
        eprintln!("Replay failed ({:?} tier): {err}", err.tier());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_memory_must_be_positive() {
        for bad in ["-1", "0", "NaN", "inf", "lots"] {
            let arg = format!("--host-memory-mb={bad}");
            assert!(
                Args::try_parse_from(["rtm-replay-demo", arg.as_str()]).is_err(),
                "accepted {bad}"
            );
        }
        let args = Args::try_parse_from(["rtm-replay-demo", "--host-memory-mb=1.5"]).unwrap();
        assert_eq!(args.host_memory_mb, Some(1.5));
        let config = build_config(&args);
        assert_eq!(config.host_memory_limit, Some(1_572_864));
    }
}
