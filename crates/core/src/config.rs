//! Run configuration
//!
//! Every option is fixed for the lifetime of a run; none can change mid-shot.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ReplayError;

/// Default number of frames held in the device ring
pub const DEFAULT_DEVICE_FRAMES: usize = 100;

/// Default number of z-planes per lossy codec block
pub const DEFAULT_BLOCK_SIZE: usize = 4;

/// Order of the wave equation driving the kernel
///
/// Second-order schemes read the previous frame as well as the current one,
/// so they need one extra zeroed slot and one extra leased slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquationOrder {
    /// Current/next leapfrog
    First,
    /// Previous/current/next
    #[default]
    Second,
}

impl EquationOrder {
    /// Slots that must be zeroed before the first step
    #[must_use]
    pub const fn initial_slots(self) -> usize {
        match self {
            Self::First => 2,
            Self::Second => 3,
        }
    }
}

/// Configuration consumed by [`crate::ReplayEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Encode segments with the lossy codec instead of raw dumps
    pub compression_enabled: bool,
    /// Absolute error bound, or relative bound when `compression_is_relative`
    pub compression_tolerance: f32,
    /// Interpret the tolerance as relative precision
    pub compression_is_relative: bool,
    /// Encode and decode blocks on the rayon pool
    pub compression_parallel: bool,
    /// z-planes per lossy block
    pub compression_block_size: usize,
    /// Directory holding the per-shot segment files
    pub segment_directory: PathBuf,
    /// Frames held in the device ring (`D`)
    pub device_frames: usize,
    /// Wave equation order of the forward kernel
    pub equation_order: EquationOrder,
    /// Byte ceiling for the host staging buffer
    pub host_memory_limit: Option<usize>,
    /// Halve once more after a constrained negotiation
    pub reserve_headroom: bool,
    /// Skip segment I/O when the whole run fits in host memory
    pub keep_resident_when_fit: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            compression_enabled: false,
            compression_tolerance: 0.01,
            compression_is_relative: false,
            compression_parallel: true,
            compression_block_size: DEFAULT_BLOCK_SIZE,
            segment_directory: PathBuf::from("replay-segments"),
            device_frames: DEFAULT_DEVICE_FRAMES,
            equation_order: EquationOrder::Second,
            host_memory_limit: None,
            reserve_headroom: false,
            keep_resident_when_fit: false,
        }
    }
}

impl ReplayConfig {
    /// Default configuration writing segments under `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            segment_directory: dir.into(),
            ..Self::default()
        }
    }

    /// Set the device ring capacity
    pub fn with_device_frames(mut self, frames: usize) -> Self {
        self.device_frames = frames;
        self
    }

    /// Set the equation order
    pub fn with_equation_order(mut self, order: EquationOrder) -> Self {
        self.equation_order = order;
        self
    }

    /// Cap the host staging buffer at `bytes`
    pub fn with_host_memory_limit(mut self, bytes: usize) -> Self {
        self.host_memory_limit = Some(bytes);
        self
    }

    /// Enable the lossy codec with an absolute error bound
    pub fn with_absolute_tolerance(mut self, tolerance: f32) -> Self {
        self.compression_enabled = true;
        self.compression_is_relative = false;
        self.compression_tolerance = tolerance;
        self
    }

    /// Enable the lossy codec with a relative error bound
    pub fn with_relative_tolerance(mut self, tolerance: f32) -> Self {
        self.compression_enabled = true;
        self.compression_is_relative = true;
        self.compression_tolerance = tolerance;
        self
    }

    /// Toggle parallel block (de)compression
    pub fn with_parallel_compression(mut self, parallel: bool) -> Self {
        self.compression_parallel = parallel;
        self
    }

    /// Keep the run in host memory when it fits
    pub fn with_keep_resident(mut self, resident: bool) -> Self {
        self.keep_resident_when_fit = resident;
        self
    }

    /// Reserve headroom after a constrained negotiation
    pub fn with_reserve_headroom(mut self, reserve: bool) -> Self {
        self.reserve_headroom = reserve;
        self
    }

    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> Result<(), ReplayError> {
        let min_slots = self.equation_order.initial_slots();
        if self.device_frames < min_slots {
            return Err(ReplayError::InvalidConfig(format!(
                "device_frames must be at least {min_slots} for {:?} order, got {}",
                self.equation_order, self.device_frames
            )));
        }
        if self.compression_enabled {
            let tol = self.compression_tolerance;
            if !tol.is_finite() || tol <= 0.0 {
                return Err(ReplayError::InvalidConfig(format!(
                    "compression_tolerance must be finite and positive, got {tol}"
                )));
            }
            if self.compression_is_relative && tol >= 1.0 {
                return Err(ReplayError::InvalidConfig(format!(
                    "relative compression_tolerance must be below 1, got {tol}"
                )));
            }
            if self.compression_block_size == 0 {
                return Err(ReplayError::InvalidConfig(
                    "compression_block_size must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}
