//! Raw frame dump
//!
//! Each frame is written as `W` native-endian `f32` values with no header, so a
//! segment is exactly `frames * W * 4` bytes and trivially seekable.

use std::io::{Read, Write};

use super::{check_frames, FrameCodec};
use crate::error::CodecError;

/// Bit-exact codec
#[derive(Debug, Clone, Copy)]
pub struct RawCodec {
    frame_len: usize,
}

impl RawCodec {
    /// Codec for frames of `frame_len` samples
    #[must_use]
    pub const fn new(frame_len: usize) -> Self {
        Self { frame_len }
    }
}

impl FrameCodec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn is_lossy(&self) -> bool {
        false
    }

    fn encode(&self, frames: &[f32], count: usize, out: &mut dyn Write) -> Result<u64, CodecError> {
        check_frames(frames.len(), count, self.frame_len)?;
        let bytes: &[u8] = bytemuck::cast_slice(frames);
        out.write_all(bytes)?;
        Ok(bytes.len() as u64)
    }

    fn decode(&self, input: &mut dyn Read, count: usize, out: &mut [f32]) -> Result<u64, CodecError> {
        check_frames(out.len(), count, self.frame_len)?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        input.read_exact(bytes)?;
        Ok(bytes.len() as u64)
    }
}
