//! Error taxonomy for the checkpoint/replay engine
//!
//! Every failure is fatal for the current shot: a missing or corrupted frame
//! silently invalidates the imaging correlation, so nothing here is retried.
//! Errors carry the tier that failed and, where one exists, the time step.

use std::fmt;
use std::io;

use thiserror::Error;

/// Sweep direction of a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Forward sweep, frames saved in increasing time order
    Forward,
    /// Backward sweep, frames replayed in decreasing time order
    Backward,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
        }
    }
}

/// Storage tier (or engine concern) responsible for a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Host staging buffer could not be sized
    Allocation,
    /// Segment file could not be written or read
    Segment,
    /// Frame encoding or decoding failed
    Codec,
    /// Device ring transfer failed
    Device,
    /// Time step requested outside the monotone cursor
    Cursor,
    /// Run configuration rejected
    Config,
}

/// Codec failures
///
/// Raised by [`crate::codec::FrameCodec`] implementations. The engine wraps them
/// with the segment index and time step before surfacing them.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying reader/writer failed
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
    /// A block encoded or decoded to zero bytes
    #[error("frame {frame} block {block} has zero length")]
    EmptyBlock {
        /// Frame index within the segment
        frame: usize,
        /// Block index within the frame
        block: usize,
    },
    /// A block declares more bytes than its samples can ever encode to
    #[error("frame {frame} block {block} declares {len} bytes")]
    BlockTooLarge {
        /// Frame index within the segment
        frame: usize,
        /// Block index within the frame
        block: usize,
        /// Declared payload length
        len: usize,
    },
    /// Payload bytes could not be interpreted
    #[error("corrupt block payload: {0}")]
    Corrupt(String),
    /// Bytes remain after every expected frame was decoded
    #[error("{0} trailing bytes after the last frame")]
    TrailingData(usize),
    /// Decoded sample count disagrees with the grid geometry
    #[error("block decoded to {actual} samples, expected {expected}")]
    LengthMismatch {
        /// Samples the geometry requires
        expected: usize,
        /// Samples actually produced
        actual: usize,
    },
    /// Absolute-tolerance mode cannot quantize NaN or infinity
    #[error("non-finite sample {0} cannot be quantized")]
    NonFinite(f32),
    /// Sample too large for the quantizer at the configured tolerance
    #[error("sample {value} is not representable at tolerance {tolerance}")]
    Unrepresentable {
        /// Offending sample
        value: f32,
        /// Quantization step
        tolerance: f64,
    },
}

/// Device ring failures
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Slot index or block length exceeds the ring
    #[error("slots {first}..{end} exceed ring capacity {capacity}")]
    OutOfRange {
        /// First slot touched
        first: usize,
        /// One past the last slot touched
        end: usize,
        /// Ring capacity in frames
        capacity: usize,
    },
    /// Host-side buffer is not a whole number of frames
    #[error("buffer of {len} samples is not a multiple of frame length {frame_len}")]
    Misaligned {
        /// Buffer length in samples
        len: usize,
        /// Frame length in samples
        frame_len: usize,
    },
    /// Mapping a device buffer for readback failed
    #[error("device readback failed: {0}")]
    Readback(String),
}

/// Fatal engine error
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Host staging buffer could not hold even the minimum viable frame count
    #[error(
        "allocation exhausted: host staging buffer could not hold {floor} frames of {frame_len} samples"
    )]
    AllocationExhausted {
        /// Minimum viable frame count
        floor: usize,
        /// Samples per frame
        frame_len: usize,
    },
    /// Segment file could not be created, written, or opened
    #[error("segment {segment} i/o failed at time step {time_step}: {source}")]
    Segment {
        /// Segment index
        segment: usize,
        /// Time step that triggered the transfer
        time_step: usize,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// Segment payload could not be encoded or decoded
    #[error("codec failed on segment {segment} at time step {time_step}: {source}")]
    Codec {
        /// Segment index
        segment: usize,
        /// Time step that triggered the transfer
        time_step: usize,
        /// Underlying error
        #[source]
        source: CodecError,
    },
    /// Device/host transfer failed
    #[error("device transfer failed at time step {time_step}: {source}")]
    Device {
        /// Time step that triggered the transfer
        time_step: usize,
        /// Underlying error
        #[source]
        source: DeviceError,
    },
    /// Time step outside the monotone cursor
    #[error("{phase} sweep expected time step {expected}, got {requested}")]
    OutOfOrder {
        /// Active sweep
        phase: Phase,
        /// Next time step the cursor accepts
        expected: usize,
        /// Time step the caller asked for
        requested: usize,
    },
    /// Every frame of the sweep has already been consumed
    #[error("{phase} sweep is exhausted, time step {requested} is past its end")]
    CursorExhausted {
        /// Active sweep
        phase: Phase,
        /// Time step the caller asked for
        requested: usize,
    },
    /// Operation called outside its sweep
    #[error("{operation} requires the {expected} sweep")]
    WrongPhase {
        /// Operation that was attempted
        operation: &'static str,
        /// Sweep the operation belongs to
        expected: Phase,
    },
    /// Backward sweep requested before every frame was saved
    #[error("forward sweep saved {saved} of {expected} frames")]
    IncompleteForward {
        /// Frames saved so far
        saved: usize,
        /// Frames in the run
        expected: usize,
    },
    /// Configuration rejected at open
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ReplayError {
    /// Tier that failed, for diagnostics and FFI error codes
    #[must_use]
    pub fn tier(&self) -> Tier {
        match self {
            Self::AllocationExhausted { .. } => Tier::Allocation,
            Self::Segment { .. } => Tier::Segment,
            Self::Codec { .. } => Tier::Codec,
            Self::Device { .. } => Tier::Device,
            Self::OutOfOrder { .. }
            | Self::CursorExhausted { .. }
            | Self::WrongPhase { .. }
            | Self::IncompleteForward { .. } => Tier::Cursor,
            Self::InvalidConfig(_) => Tier::Config,
        }
    }

    /// Wrap a codec failure, routing stream errors to the segment tier
    pub(crate) fn from_codec(segment: usize, time_step: usize, error: CodecError) -> Self {
        match error {
            CodecError::Io(source) if source.kind() != io::ErrorKind::UnexpectedEof => {
                Self::Segment {
                    segment,
                    time_step,
                    source,
                }
            }
            source => Self::Codec {
                segment,
                time_step,
                source,
            },
        }
    }
}
