use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::sync::Mutex;

use rtm_replay_core::config::{DEFAULT_BLOCK_SIZE, DEFAULT_DEVICE_FRAMES};
use rtm_replay_core::{EquationOrder, GridDims, ReplayConfig, ReplayEngine};

use crate::error::{DefaultReplayFfiError, RtmReplayErrorCode};
use crate::helpers::{clear_last_error, track_error};

/// Run configuration passed by value from C.
///
/// Start from `rtm_replay_config_default()` and override the fields you need.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RtmReplayConfig {
    /// Directory for segment files (null-terminated UTF-8). Required.
    pub segment_directory: *const c_char,
    /// Samples along x.
    pub nx: usize,
    /// Samples along y (1 for 2D grids).
    pub ny: usize,
    /// Samples along z.
    pub nz: usize,
    /// Last forward time step `NT`; the run holds `NT + 1` frames.
    pub last_step: usize,
    /// Frames held in the device ring.
    pub device_frames: usize,
    /// `true` for previous/current/next kernels.
    pub second_order: bool,
    /// Encode segments with the lossy codec.
    pub compression_enabled: bool,
    /// Absolute error bound, or relative bound when `compression_is_relative`.
    pub compression_tolerance: f32,
    /// Interpret the tolerance as relative precision.
    pub compression_is_relative: bool,
    /// Encode and decode blocks in parallel.
    pub compression_parallel: bool,
    /// z-planes per lossy block.
    pub compression_block_size: usize,
    /// Byte ceiling for the host staging buffer; 0 means unlimited.
    pub host_memory_limit: usize,
    /// Halve once more after a constrained negotiation.
    pub reserve_headroom: bool,
    /// Skip segment I/O when the whole run fits in host memory.
    pub keep_resident_when_fit: bool,
}

impl RtmReplayConfig {
    /// Convert into engine types, copying the directory string.
    fn to_engine(self) -> Result<(ReplayConfig, GridDims), DefaultReplayFfiError> {
        if self.segment_directory.is_null() {
            return Err(DefaultReplayFfiError::null_pointer("segment_directory"));
        }
        // SAFETY: non-null and documented as a null-terminated string.
        let dir = unsafe { CStr::from_ptr(self.segment_directory) }
            .to_str()
            .map_err(|_| {
                DefaultReplayFfiError::invalid_parameter("segment_directory", "must be valid UTF-8")
            })?;

        let config = ReplayConfig {
            compression_enabled: self.compression_enabled,
            compression_tolerance: self.compression_tolerance,
            compression_is_relative: self.compression_is_relative,
            compression_parallel: self.compression_parallel,
            compression_block_size: self.compression_block_size,
            segment_directory: dir.into(),
            device_frames: self.device_frames,
            equation_order: if self.second_order {
                EquationOrder::Second
            } else {
                EquationOrder::First
            },
            host_memory_limit: (self.host_memory_limit > 0).then_some(self.host_memory_limit),
            reserve_headroom: self.reserve_headroom,
            keep_resident_when_fit: self.keep_resident_when_fit,
        };
        Ok((config, GridDims::new(self.nx, self.ny, self.nz)))
    }
}

/// Default configuration with a null segment directory and zero-sized grid.
///
/// The caller must set `segment_directory`, the grid dimensions and `last_step`.
#[no_mangle]
pub extern "C" fn rtm_replay_config_default() -> RtmReplayConfig {
    let defaults = ReplayConfig::default();
    RtmReplayConfig {
        segment_directory: ptr::null(),
        nx: 0,
        ny: 1,
        nz: 0,
        last_step: 0,
        device_frames: DEFAULT_DEVICE_FRAMES,
        second_order: defaults.equation_order == EquationOrder::Second,
        compression_enabled: defaults.compression_enabled,
        compression_tolerance: defaults.compression_tolerance,
        compression_is_relative: defaults.compression_is_relative,
        compression_parallel: defaults.compression_parallel,
        compression_block_size: DEFAULT_BLOCK_SIZE,
        host_memory_limit: 0,
        reserve_headroom: defaults.reserve_headroom,
        keep_resident_when_fit: defaults.keep_resident_when_fit,
    }
}

/// One replay engine for one shot at a time.
///
/// # Thread Safety
/// The engine is behind a `Mutex`, so calls from several threads serialize.
/// The sweep itself is strictly ordered, so interleaving saves or fetches
/// from different threads is a cursor error, not a data race.
///
/// The device ring lives in host memory so the pointers handed out by
/// `rtm_replay_save_forward` and `rtm_replay_fetch_forward` can be used by
/// a CPU kernel directly.
pub struct RtmReplayInstance {
    pub(crate) engine: Mutex<ReplayEngine>,
}

impl RtmReplayInstance {
    /// Open an engine for `config`.
    ///
    /// # Errors
    ///
    /// Returns `NullPointer` if the segment directory is null and
    /// `InvalidParameter` if the engine rejects the configuration.
    pub(crate) fn new(config: RtmReplayConfig) -> Result<Box<Self>, DefaultReplayFfiError> {
        let last_step = config.last_step;
        let (config, dims) = config.to_engine()?;
        let engine = ReplayEngine::open(config, dims, last_step)?;
        Ok(Box::new(Self {
            engine: Mutex::new(engine),
        }))
    }
}

/// Create a replay engine and return it via out-parameter.
///
/// Returns
/// - `RtmReplayErrorCode::Ok` (0) with a valid pointer in `out_instance`
/// - `RtmReplayErrorCode::NullPointer` if `out_instance` or `segment_directory` is null
/// - `RtmReplayErrorCode::InvalidParameter` if the configuration is rejected
///
/// On failure `out_instance` is set to null and `rtm_replay_get_last_error()`
/// describes the problem.
///
/// # Safety
///
/// - `out_instance` must be a valid, non-null pointer to writable memory.
/// - `config.segment_directory` must be a valid null-terminated string; it is copied.
/// - The caller owns the instance and MUST call `rtm_replay_destroy` exactly once.
///
/// Example (C)
/// ```c
/// RtmReplayConfig config = rtm_replay_config_default();
/// config.segment_directory = "/scratch/shot_0001";
/// config.nx = 400; config.nz = 200; config.last_step = 2999;
/// RtmReplayInstance* engine = NULL;
/// if (rtm_replay_new(config, &engine) != Ok) {
///     fprintf(stderr, "%s\n", rtm_replay_get_last_error());
/// }
/// ```
#[no_mangle]
pub unsafe extern "C" fn rtm_replay_new(
    config: RtmReplayConfig,
    out_instance: *mut *mut RtmReplayInstance,
) -> RtmReplayErrorCode {
    if out_instance.is_null() {
        return track_error(&DefaultReplayFfiError::null_pointer("out_instance"));
    }

    match RtmReplayInstance::new(config) {
        Ok(instance) => {
            unsafe {
                *out_instance = Box::into_raw(instance);
            }
            clear_last_error();
            RtmReplayErrorCode::Ok
        }
        Err(err) => {
            unsafe {
                *out_instance = ptr::null_mut();
            }
            track_error(&err)
        }
    }
}

/// Destroy an engine created by `rtm_replay_new`, removing its segment files.
///
/// A null `ptr` is a no-op.
///
/// # Safety
/// - The pointer MUST have been created by `rtm_replay_new` and not destroyed already.
/// - Pointers previously returned into the device ring dangle after this call.
#[no_mangle]
pub unsafe extern "C" fn rtm_replay_destroy(ptr: *mut RtmReplayInstance) {
    if ptr.is_null() {
        return;
    }

    // SAFETY: created by `Box::into_raw` in `rtm_replay_new`.
    let instance = unsafe { Box::from_raw(ptr) };
    match instance.engine.into_inner() {
        Ok(engine) => {
            if let Err(err) = engine.close() {
                tracing::warn!(%err, "Failed to remove segment files");
            }
        }
        Err(_) => tracing::warn!("Destroying engine with a poisoned lock"),
    }
}
