//! RTM Wavefield Replay Core Library
//!
//! Checkpoint/replay engine for reverse-time migration. Every forward time step
//! is stored as it is produced and handed back, in reverse order, during the
//! backward sweep.
//!
//! ## Storage tiers
//!
//! - Device ring: `D` frames the stencil kernel reads and writes in place
//! - Host staging buffer: `H = D * R` frames, sized by capacity negotiation
//! - Segment files: one per host block, raw or lossy-compressed
//!
//! ## Feature Flags
//!
//! - `gpu` (default): wgpu-backed device ring with automatic host fallback

// Frame geometry and run configuration
pub mod config;
pub mod error;
pub mod grid;

// Storage tiers
pub mod codec;
pub mod device;
pub mod segment;
pub mod staging;

// Replay scheduling
pub mod layout;
pub mod lease;
pub mod negotiate;
pub mod profiler;
pub mod replay;
pub mod wavefield;

// Re-export engine types
pub use config::{EquationOrder, ReplayConfig};
pub use error::{CodecError, DeviceError, Phase, ReplayError, Tier};
pub use grid::GridDims;
pub use replay::ReplayEngine;

// Re-export tier types
pub use codec::{create_codec, FrameCodec, LossyCodec, Quantizer, RawCodec};
pub use device::{create_device_ring, DeviceRing, HostRing, StepView};
pub use layout::ReplayLayout;
pub use lease::{FrameSlot, ReplayLease, StepLease};
pub use negotiate::{negotiate, CapacityRequest, Negotiation};
pub use profiler::{ProfilerScope, TransferStats};
pub use segment::SegmentStore;
pub use staging::HostStaging;
pub use wavefield::{Wavefield, WavefieldBinding};

#[cfg(feature = "gpu")]
pub use device::{GpuContext, GpuInitResult, GpuRing};
