//! Frame codecs
//!
//! A codec turns a run of consecutive frames into the byte stream stored in one
//! segment file, and back. Two strategies exist, selected by configuration:
//!
//! - [`RawCodec`]: byte-for-byte dump, fixed length, bit-exact
//! - [`LossyCodec`]: error-bounded block compression, variable length
//!
//! # Example
//!
//! ```rust,ignore
//! use rtm_replay_core::codec::create_codec;
//! use rtm_replay_core::{GridDims, ReplayConfig};
//!
//! let config = ReplayConfig::new("/tmp/segments").with_absolute_tolerance(1e-3);
//! let codec = create_codec(&config, GridDims::planar(256, 128));
//! assert!(codec.is_lossy());
//! ```

mod lossy;
mod raw;

use std::io::{Read, Write};

pub use lossy::{LossyCodec, Quantizer};
pub use raw::RawCodec;

use crate::config::ReplayConfig;
use crate::error::CodecError;
use crate::grid::GridDims;

/// Strategy for (de)serializing runs of frames
pub trait FrameCodec: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// `true` when decoding only reproduces values within a tolerance
    fn is_lossy(&self) -> bool;

    /// Encode `count` frames from `frames` into `out`
    ///
    /// # Returns
    ///
    /// Bytes written
    fn encode(&self, frames: &[f32], count: usize, out: &mut dyn Write) -> Result<u64, CodecError>;

    /// Decode `count` frames from `input` into `out`
    ///
    /// # Returns
    ///
    /// Bytes consumed
    fn decode(&self, input: &mut dyn Read, count: usize, out: &mut [f32]) -> Result<u64, CodecError>;
}

/// Select the codec named by `config`
#[must_use]
pub fn create_codec(config: &ReplayConfig, dims: GridDims) -> Box<dyn FrameCodec> {
    if config.compression_enabled {
        let quantizer = if config.compression_is_relative {
            Quantizer::relative(config.compression_tolerance)
        } else {
            Quantizer::absolute(config.compression_tolerance)
        };
        Box::new(LossyCodec::new(
            dims,
            quantizer,
            config.compression_block_size,
            config.compression_parallel,
        ))
    } else {
        Box::new(RawCodec::new(dims.volume()))
    }
}

/// Fail if `input` still has bytes after the last frame
pub fn expect_end(input: &mut dyn Read) -> Result<(), CodecError> {
    let mut tail = [0_u8; 64];
    let leftover = input.read(&mut tail)?;
    if leftover > 0 {
        return Err(CodecError::TrailingData(leftover));
    }
    Ok(())
}

/// Check that `frames` holds exactly `count` frames of `frame_len` samples
fn check_frames(frames: usize, count: usize, frame_len: usize) -> Result<(), CodecError> {
    let expected = count * frame_len;
    if frames == expected {
        Ok(())
    } else {
        Err(CodecError::LengthMismatch {
            expected,
            actual: frames,
        })
    }
}
