//! Device ring buffer backends
//!
//! The ring holds `D` frames addressed by `t % D`. It is the buffer the stencil
//! kernel reads and writes directly, and the unit of transfer to and from the
//! host staging buffer.
//!
//! # Feature Flags
//!
//! - `gpu` (default): enables [`GpuRing`], a wgpu storage buffer. Disable with
//!   `--no-default-features` for environments without GPU access.
//!
//! # Backend Selection
//!
//! [`create_device_ring`] tries the GPU first and falls back to [`HostRing`],
//! which is always available.

#[cfg(feature = "gpu")]
mod context;
#[cfg(feature = "gpu")]
mod gpu;
mod host;

use std::borrow::Cow;

use tracing::info;
#[cfg(feature = "gpu")]
use tracing::warn;

#[cfg(feature = "gpu")]
pub use context::{GpuContext, GpuInitResult};
#[cfg(feature = "gpu")]
pub use gpu::GpuRing;
pub use host::{HostRing, StepView};

use crate::error::DeviceError;

/// Backend-agnostic ring of `slots` frames
///
/// Block transfers always start at a slot boundary and move whole frames.
pub trait DeviceRing: Send + Sync {
    /// Capacity in frames (`D`)
    fn slots(&self) -> usize;

    /// Samples per frame (`W`)
    fn frame_len(&self) -> usize;

    /// Fill one slot with zeros
    fn zero_slot(&mut self, slot: usize) -> Result<(), DeviceError>;

    /// Copy whole frames from host memory into consecutive slots
    fn upload(&mut self, first_slot: usize, src: &[f32]) -> Result<(), DeviceError>;

    /// Copy consecutive slots into host memory, blocking until complete
    fn download(&self, first_slot: usize, dst: &mut [f32]) -> Result<(), DeviceError>;

    /// Read one slot
    ///
    /// Host backends borrow, GPU backends return an owned copy.
    fn read_slot(&self, slot: usize) -> Result<Cow<'_, [f32]>, DeviceError>;

    /// Overwrite one slot
    fn write_slot(&mut self, slot: usize, frame: &[f32]) -> Result<(), DeviceError> {
        if frame.len() != self.frame_len() {
            return Err(DeviceError::Misaligned {
                len: frame.len(),
                frame_len: self.frame_len(),
            });
        }
        self.upload(slot, frame)
    }

    /// `true` when the ring lives in accelerator memory
    fn is_gpu_accelerated(&self) -> bool;
}

impl DeviceRing for Box<dyn DeviceRing> {
    fn slots(&self) -> usize {
        (**self).slots()
    }

    fn frame_len(&self) -> usize {
        (**self).frame_len()
    }

    fn zero_slot(&mut self, slot: usize) -> Result<(), DeviceError> {
        (**self).zero_slot(slot)
    }

    fn upload(&mut self, first_slot: usize, src: &[f32]) -> Result<(), DeviceError> {
        (**self).upload(first_slot, src)
    }

    fn download(&self, first_slot: usize, dst: &mut [f32]) -> Result<(), DeviceError> {
        (**self).download(first_slot, dst)
    }

    fn read_slot(&self, slot: usize) -> Result<Cow<'_, [f32]>, DeviceError> {
        (**self).read_slot(slot)
    }

    fn write_slot(&mut self, slot: usize, frame: &[f32]) -> Result<(), DeviceError> {
        (**self).write_slot(slot, frame)
    }

    fn is_gpu_accelerated(&self) -> bool {
        (**self).is_gpu_accelerated()
    }
}

/// Create a device ring with automatic backend selection
///
/// 1. If the `gpu` feature is enabled, try to initialize a GPU and allocate
///    the ring there
/// 2. If no adapter is found, initialization fails, or the ring exceeds the
///    device buffer limit, use host memory
pub fn create_device_ring(slots: usize, frame_len: usize) -> Box<dyn DeviceRing> {
    #[cfg(feature = "gpu")]
    {
        match GpuContext::new() {
            GpuInitResult::Success(context) => {
                let bytes = (slots * frame_len * std::mem::size_of::<f32>()) as u64;
                if context.can_allocate(bytes) {
                    info!(
                        "Using GPU device ring: {} ({} slots x {} samples)",
                        context.adapter_name(),
                        slots,
                        frame_len
                    );
                    return Box::new(GpuRing::new(context, slots, frame_len));
                }
                warn!(
                    "GPU buffer limit too small for a {} byte ring, falling back to host memory",
                    bytes
                );
            }
            GpuInitResult::NoGpuFound => {
                info!("No GPU found, using host device ring");
            }
            GpuInitResult::InitFailed {
                adapter_name,
                error,
            } => {
                warn!(
                    "GPU '{}' found but failed to initialize: {}. Falling back to host memory.",
                    adapter_name, error
                );
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    info!("GPU feature disabled, using host device ring");

    Box::new(HostRing::new(slots, frame_len))
}

/// Frames covered by a buffer of `len` samples
pub(crate) fn whole_frames(len: usize, frame_len: usize) -> Result<usize, DeviceError> {
    if frame_len == 0 || len % frame_len != 0 {
        return Err(DeviceError::Misaligned { len, frame_len });
    }
    Ok(len / frame_len)
}

/// Check that `count` slots starting at `first` fit in the ring
pub(crate) fn check_slots(first: usize, count: usize, capacity: usize) -> Result<(), DeviceError> {
    let end = first + count;
    if end > capacity || (count == 0 && first >= capacity) {
        return Err(DeviceError::OutOfRange {
            first,
            end,
            capacity,
        });
    }
    Ok(())
}
