//! Checkpoint/replay engine
//!
//! Drives the three storage tiers for one shot at a time:
//!
//! ```text
//! forward:  kernel -> device ring (D) -> host staging (H = D * R) -> segment files
//! backward: kernel <- device ring (D) <- host staging (H)         <- segment files
//! ```
//!
//! # Lifecycle
//!
//! 1. `reset_grid(Phase::Forward)`: negotiates the host buffer on first use,
//!    clears stale segments, zeroes the initial slots
//! 2. `save_forward(0..=NT)`: strictly increasing
//! 3. `reset_grid(Phase::Backward)`
//! 4. `fetch_forward(NT..=0)`: strictly decreasing, each followed by
//!    `forward_frame()` to read the replayed field
//!
//! The device ring and host buffer survive across shots; segment files and the
//! cursor do not.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtm_replay_core::{GridDims, Phase, ReplayConfig, ReplayEngine};
//!
//! let mut engine = ReplayEngine::open(ReplayConfig::new("/tmp/shot"), GridDims::planar(200, 100), 999)?;
//! engine.reset_grid(Phase::Forward)?;
//! for t in 0..=999 {
//!     let lease = engine.save_forward(t)?;
//!     let view = engine.step_view(&lease)?;
//!     // stencil: read view.current (and view.previous), write view.next
//! }
//! engine.reset_grid(Phase::Backward)?;
//! for t in (0..=999).rev() {
//!     engine.fetch_forward(t)?;
//!     let forward = engine.forward_frame()?;
//!     // correlate forward with the backward field
//! }
//! engine.close()?;
//! ```

use std::borrow::Cow;
use std::io::Write;

use tracing::{debug, info, warn};

use crate::codec::{create_codec, expect_end, FrameCodec};
use crate::config::{EquationOrder, ReplayConfig};
use crate::device::{create_device_ring, DeviceRing, HostRing, StepView};
use crate::error::{Phase, ReplayError};
use crate::grid::GridDims;
use crate::layout::ReplayLayout;
use crate::lease::{ReplayLease, StepLease};
use crate::negotiate::{negotiate, CapacityRequest};
use crate::profiler::{ProfilerScope, TransferStats};
use crate::segment::SegmentStore;
use crate::staging::HostStaging;
use crate::wavefield::WavefieldBinding;

/// Position of the monotone cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// No sweep started
    Idle,
    /// Next frame to save; equals the frame count once the sweep is done
    Forward { next: usize },
    /// Next frame to replay; `None` once frame 0 was replayed
    Backward { next: Option<usize> },
}

/// Engine owning every tier of one run
///
/// Generic over the device ring so embedders can supply a GPU ring, a host
/// ring, or a boxed backend chosen at runtime.
pub struct ReplayEngine<R: DeviceRing = HostRing> {
    config: ReplayConfig,
    dims: GridDims,
    total_frames: usize,
    codec: Box<dyn FrameCodec>,
    store: SegmentStore,
    device: R,
    host: Option<HostStaging>,
    layout: Option<ReplayLayout>,
    host_sufficient: bool,
    resident: bool,
    cursor: Cursor,
    forward_complete: bool,
    replayed: Option<ReplayLease>,
    stats: TransferStats,
}

impl ReplayEngine<HostRing> {
    /// Open an engine whose device ring lives in host memory
    ///
    /// # Arguments
    ///
    /// * `config` - Run configuration, validated here
    /// * `dims` - Grid of every frame
    /// * `last_step` - `NT`; the run holds `NT + 1` frames
    pub fn open(config: ReplayConfig, dims: GridDims, last_step: usize) -> Result<Self, ReplayError> {
        config.validate()?;
        check_dims(dims, config.device_frames)?;
        let ring = HostRing::new(config.device_frames, dims.volume());
        Self::with_device(config, dims, last_step, ring)
    }

    /// Borrow the slots of a forward lease for the kernel
    pub fn step_view(&mut self, lease: &StepLease) -> Result<StepView<'_>, ReplayError> {
        self.device
            .step_view(
                lease.current.slot,
                lease.next.slot,
                lease.previous.map(|p| p.slot),
            )
            .map_err(|source| ReplayError::Device {
                time_step: lease.time_step,
                source,
            })
    }
}

impl ReplayEngine<Box<dyn DeviceRing>> {
    /// Open an engine on the best available device ring
    pub fn open_auto(config: ReplayConfig, dims: GridDims, last_step: usize) -> Result<Self, ReplayError> {
        config.validate()?;
        check_dims(dims, config.device_frames)?;
        let ring = create_device_ring(config.device_frames, dims.volume());
        Self::with_device(config, dims, last_step, ring)
    }
}

impl<R: DeviceRing> ReplayEngine<R> {
    /// Open an engine on a caller-supplied device ring
    ///
    /// The ring must hold `config.device_frames` frames of `dims.volume()`
    /// samples.
    pub fn with_device(
        config: ReplayConfig,
        dims: GridDims,
        last_step: usize,
        device: R,
    ) -> Result<Self, ReplayError> {
        config.validate()?;
        check_dims(dims, config.device_frames)?;
        let total_frames = last_step
            .checked_add(1)
            .ok_or_else(|| ReplayError::InvalidConfig("last time step overflows".to_string()))?;
        if device.slots() != config.device_frames || device.frame_len() != dims.volume() {
            return Err(ReplayError::InvalidConfig(format!(
                "device ring holds {} frames of {} samples, expected {} of {}",
                device.slots(),
                device.frame_len(),
                config.device_frames,
                dims.volume()
            )));
        }

        let codec = create_codec(&config, dims);
        info!(
            codec = codec.name(),
            device_frames = config.device_frames,
            frames = total_frames,
            gpu = device.is_gpu_accelerated(),
            "Opened replay engine"
        );

        Ok(Self {
            store: SegmentStore::new(&config.segment_directory),
            config,
            dims,
            total_frames,
            codec,
            device,
            host: None,
            layout: None,
            host_sufficient: false,
            resident: false,
            cursor: Cursor::Idle,
            forward_complete: false,
            replayed: None,
            stats: TransferStats::default(),
        })
    }

    /// Start a sweep
    ///
    /// Returns where the kernel's working set must live for that sweep.
    pub fn reset_grid(&mut self, phase: Phase) -> Result<WavefieldBinding, ReplayError> {
        match phase {
            Phase::Forward => self.begin_forward(),
            Phase::Backward => self.begin_backward(),
        }
    }

    fn begin_forward(&mut self) -> Result<WavefieldBinding, ReplayError> {
        let layout = match self.layout {
            Some(layout) => layout,
            None => self.allocate_host()?,
        };

        if !self.resident {
            self.store
                .prepare()
                .map_err(|source| ReplayError::Segment {
                    segment: 0,
                    time_step: 0,
                    source,
                })?;
        }

        let d = layout.device_frames();
        let mut slots = vec![0, 1];
        if self.config.equation_order == EquationOrder::Second {
            slots.push(d - 1);
        }
        for slot in slots {
            self.device
                .zero_slot(slot)
                .map_err(|source| ReplayError::Device {
                    time_step: 0,
                    source,
                })?;
        }

        self.stats = TransferStats::default();
        self.cursor = Cursor::Forward { next: 0 };
        self.forward_complete = false;
        self.replayed = None;
        Ok(WavefieldBinding::Checkpoint)
    }

    fn allocate_host(&mut self) -> Result<ReplayLayout, ReplayError> {
        let d = self.config.device_frames;
        let frame_len = self.dims.volume();
        let limit = self.config.host_memory_limit;
        let request = CapacityRequest::new(self.total_frames, d, frame_len)
            .with_reserve_headroom(self.config.reserve_headroom);

        let negotiation = negotiate(&request, |frames| {
            HostStaging::try_allocate(frames, frame_len, limit)
        })?;

        let layout = ReplayLayout::new(d, negotiation.frames, self.total_frames);
        self.host_sufficient = negotiation.is_sufficient();
        self.resident = self.config.keep_resident_when_fit && layout.host_holds_run();

        info!(
            host_frames = layout.host_frames(),
            ratio = layout.ratio(),
            segments = layout.segment_count(),
            bytes = negotiation.buffer.size_bytes(),
            attempts = negotiation.attempts,
            resident = self.resident,
            "Host staging buffer negotiated"
        );
        if !self.host_sufficient {
            warn!(
                host_frames = layout.host_frames(),
                frames = self.total_frames,
                "Host memory insufficient for the whole run, replay will use {} segments",
                layout.segment_count()
            );
        }

        self.host = Some(negotiation.buffer);
        self.layout = Some(layout);
        Ok(layout)
    }

    fn begin_backward(&mut self) -> Result<WavefieldBinding, ReplayError> {
        if !self.forward_complete {
            let saved = match self.cursor {
                Cursor::Forward { next } => next,
                _ => 0,
            };
            return Err(ReplayError::IncompleteForward {
                saved,
                expected: self.total_frames,
            });
        }
        // Trailing segment and device block are loaded by the first fetch
        self.cursor = Cursor::Backward {
            next: Some(self.total_frames - 1),
        };
        self.replayed = None;
        Ok(WavefieldBinding::Private)
    }

    /// Commit frame `t` from its ring slot and lease slots for the next step
    ///
    /// Frame `t` must already be in slot `t % D`: zeroed for `t = 0`, written
    /// by the previous step otherwise. Any device flush or segment write the
    /// frame completes happens before this returns.
    pub fn save_forward(&mut self, t: usize) -> Result<StepLease, ReplayError> {
        match self.cursor {
            Cursor::Forward { next } if next == self.total_frames => {
                return Err(ReplayError::CursorExhausted {
                    phase: Phase::Forward,
                    requested: t,
                });
            }
            Cursor::Forward { next } if next != t => {
                return Err(ReplayError::OutOfOrder {
                    phase: Phase::Forward,
                    expected: next,
                    requested: t,
                });
            }
            Cursor::Forward { .. } => {}
            _ => {
                return Err(ReplayError::WrongPhase {
                    operation: "save_forward",
                    expected: Phase::Forward,
                });
            }
        }
        let layout = self.layout()?;

        if layout.closes_device_block(t) {
            self.flush_device_block(&layout, t)?;
        }
        if layout.closes_segment(t) && !self.resident {
            self.write_segment(&layout, t)?;
        }

        self.cursor = Cursor::Forward { next: t + 1 };
        if t == layout.last_step() {
            self.forward_complete = true;
            debug!(frames = self.total_frames, "Forward sweep complete");
        }

        Ok(StepLease::new(
            &layout,
            t,
            self.dims.volume(),
            self.config.equation_order == EquationOrder::Second,
        ))
    }

    /// Bring frame `t` into its ring slot
    ///
    /// Loads the frame's segment and device block first when `t` opens them.
    pub fn fetch_forward(&mut self, t: usize) -> Result<ReplayLease, ReplayError> {
        match self.cursor {
            Cursor::Backward { next: None } => {
                return Err(ReplayError::CursorExhausted {
                    phase: Phase::Backward,
                    requested: t,
                });
            }
            Cursor::Backward { next: Some(next) } if next != t => {
                return Err(ReplayError::OutOfOrder {
                    phase: Phase::Backward,
                    expected: next,
                    requested: t,
                });
            }
            Cursor::Backward { .. } => {}
            _ => {
                return Err(ReplayError::WrongPhase {
                    operation: "fetch_forward",
                    expected: Phase::Backward,
                });
            }
        }
        let layout = self.layout()?;

        if layout.opens_segment(t) && !self.resident {
            self.read_segment(&layout, t)?;
        }
        if layout.opens_device_block(t) {
            self.upload_device_block(&layout, t)?;
        }

        self.cursor = Cursor::Backward {
            next: t.checked_sub(1),
        };
        let lease = ReplayLease::new(&layout, t, self.dims.volume());
        self.replayed = Some(lease);
        Ok(lease)
    }

    /// Read the frame of the most recent `fetch_forward`
    pub fn forward_frame(&self) -> Result<Cow<'_, [f32]>, ReplayError> {
        let lease = match (self.cursor, self.replayed) {
            (Cursor::Backward { .. }, Some(lease)) => lease,
            _ => {
                return Err(ReplayError::WrongPhase {
                    operation: "forward_frame",
                    expected: Phase::Backward,
                });
            }
        };
        self.device
            .read_slot(lease.frame.slot)
            .map_err(|source| ReplayError::Device {
                time_step: lease.time_step,
                source,
            })
    }

    fn flush_device_block(&mut self, layout: &ReplayLayout, t: usize) -> Result<(), ReplayError> {
        let block = layout.device_block(t);
        let len = layout.device_block_len(block);
        let offset = layout.host_block_offset(block);
        let host = self.host.as_mut().ok_or(ReplayError::WrongPhase {
            operation: "save_forward",
            expected: Phase::Forward,
        })?;

        self.device
            .download(0, host.block_mut(offset, len))
            .map_err(|source| ReplayError::Device {
                time_step: t,
                source,
            })?;
        self.stats.device_to_host += 1;
        debug!(block, frames = len, host_offset = offset, "Flushed device block to host");
        Ok(())
    }

    fn upload_device_block(&mut self, layout: &ReplayLayout, t: usize) -> Result<(), ReplayError> {
        let block = layout.device_block(t);
        let len = layout.device_block_len(block);
        let offset = layout.host_block_offset(block);
        let host = self.host.as_ref().ok_or(ReplayError::WrongPhase {
            operation: "fetch_forward",
            expected: Phase::Backward,
        })?;

        self.device
            .upload(0, host.block(offset, len))
            .map_err(|source| ReplayError::Device {
                time_step: t,
                source,
            })?;
        self.stats.host_to_device += 1;
        debug!(block, frames = len, host_offset = offset, "Uploaded host block to device");
        Ok(())
    }

    fn write_segment(&mut self, layout: &ReplayLayout, t: usize) -> Result<(), ReplayError> {
        let segment = layout.segment_of(t);
        let frames = layout.segment_len(segment);
        let io_error = |source| ReplayError::Segment {
            segment,
            time_step: t,
            source,
        };
        let host = self.host.as_ref().ok_or(ReplayError::WrongPhase {
            operation: "save_forward",
            expected: Phase::Forward,
        })?;

        let scope = ProfilerScope::new("segment_write");
        let mut writer = self.store.create(segment).map_err(io_error)?;
        let bytes = self
            .codec
            .encode(host.block(0, frames), frames, &mut writer)
            .map_err(|e| ReplayError::from_codec(segment, t, e))?;
        writer.flush().map_err(io_error)?;

        self.stats.segment_writes += 1;
        self.stats.bytes_written += bytes;
        self.stats.encode_ms += scope.elapsed_ms();
        debug!(segment, frames, bytes, codec = self.codec.name(), "Wrote segment");
        Ok(())
    }

    fn read_segment(&mut self, layout: &ReplayLayout, t: usize) -> Result<(), ReplayError> {
        let segment = layout.segment_of(t);
        let frames = layout.segment_len(segment);
        let host = self.host.as_mut().ok_or(ReplayError::WrongPhase {
            operation: "fetch_forward",
            expected: Phase::Backward,
        })?;

        let scope = ProfilerScope::new("segment_read");
        let mut reader = self
            .store
            .open(segment)
            .map_err(|source| ReplayError::Segment {
                segment,
                time_step: t,
                source,
            })?;
        let bytes = self
            .codec
            .decode(&mut reader, frames, host.block_mut(0, frames))
            .map_err(|e| ReplayError::from_codec(segment, t, e))?;
        expect_end(&mut reader).map_err(|e| ReplayError::from_codec(segment, t, e))?;

        self.stats.segment_reads += 1;
        self.stats.bytes_read += bytes;
        self.stats.decode_ms += scope.elapsed_ms();
        debug!(segment, frames, bytes, codec = self.codec.name(), "Read segment");
        Ok(())
    }

    fn layout(&self) -> Result<ReplayLayout, ReplayError> {
        self.layout.ok_or(ReplayError::WrongPhase {
            operation: "save_forward",
            expected: Phase::Forward,
        })
    }

    /// Configuration the engine was opened with
    #[must_use]
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Grid of every frame
    #[must_use]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Tier capacities, once the host buffer has been negotiated
    #[must_use]
    pub fn replay_layout(&self) -> Option<ReplayLayout> {
        self.layout
    }

    /// Negotiated host capacity `H`
    #[must_use]
    pub fn host_frames(&self) -> Option<usize> {
        self.layout.map(|l| l.host_frames())
    }

    /// `true` once negotiation gave room for the entire run
    #[must_use]
    pub fn is_host_memory_sufficient(&self) -> bool {
        self.host_sufficient
    }

    /// `true` when replay is served from host memory without segment files
    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.resident
    }

    /// Transfers of the current shot
    #[must_use]
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Name of the active codec
    #[must_use]
    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Device ring
    #[must_use]
    pub fn device(&self) -> &R {
        &self.device
    }

    /// Mutable device ring, for kernels that address slots themselves
    pub fn device_mut(&mut self) -> &mut R {
        &mut self.device
    }

    /// Remove this shot's segment files and release every buffer
    pub fn close(self) -> Result<(), ReplayError> {
        let removed = self
            .store
            .clear()
            .map_err(|source| ReplayError::Segment {
                segment: 0,
                time_step: 0,
                source,
            })?;
        debug!(removed, "Closed replay engine");
        Ok(())
    }
}

fn check_dims(dims: GridDims, device_frames: usize) -> Result<(), ReplayError> {
    if !dims.is_valid() {
        return Err(ReplayError::InvalidConfig(format!(
            "grid {}x{}x{} has a zero-sized axis",
            dims.nx, dims.ny, dims.nz
        )));
    }
    let ring_bytes = dims
        .checked_volume()
        .and_then(|w| w.checked_mul(device_frames))
        .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()));
    // allocations are capped at `isize::MAX` bytes
    if !ring_bytes.is_some_and(|bytes| isize::try_from(bytes).is_ok()) {
        return Err(ReplayError::InvalidConfig(format!(
            "grid {}x{}x{} with {device_frames} device frames overflows the address space",
            dims.nx, dims.ny, dims.nz
        )));
    }
    Ok(())
}
