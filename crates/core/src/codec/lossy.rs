//! Error-bounded lossy codec
//!
//! Each frame is split along z into blocks of `block_size` planes. Blocks are
//! quantized and deflated independently (in parallel on the rayon pool when
//! enabled), then written in order as `(length: usize, payload)` records:
//!
//! ```text
//! frame 0: [len0][payload0][len1][payload1]...  ceil(nz / block_size) blocks
//! frame 1: ...
//! ```
//!
//! The block count is derived from the grid, never stored, so encoder and
//! decoder must agree on dimensions and block size.
//!
//! # Quantizers
//!
//! - Absolute: uniform quantization with step `tolerance`, delta + zigzag +
//!   varint coded. Error is at most `tolerance / 2` plus `f32` rounding.
//! - Relative: mantissa rounded to `ceil(-log2(tolerance))` bits, byte-plane
//!   shuffled. Error is at most `tolerance * |x|` for normal floats.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use rayon::prelude::*;

use super::{check_frames, FrameCodec};
use crate::error::CodecError;
use crate::grid::GridDims;

/// Largest quantum representable exactly by an `f64`
const MAX_QUANTUM: f64 = 9_007_199_254_740_992.0;

/// Explicit mantissa bits of an `f32`
const MANTISSA_BITS: u32 = 23;
const EXPONENT_MASK: u32 = 0x7f80_0000;

/// Worst-case varint bytes per sample, plus deflate framing slack
const MAX_BYTES_PER_SAMPLE: usize = 11;
const BLOCK_SLACK_BYTES: usize = 1024;

/// Value quantization applied before entropy coding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantizer {
    /// Round to multiples of `step`
    Absolute {
        /// Quantization step (the configured tolerance)
        step: f64,
    },
    /// Keep `keep_bits` mantissa bits, rounding to nearest
    Relative {
        /// Mantissa bits retained (1..=23)
        keep_bits: u32,
    },
}

impl Quantizer {
    /// Absolute-error quantizer
    #[must_use]
    pub fn absolute(tolerance: f32) -> Self {
        Self::Absolute {
            step: f64::from(tolerance),
        }
    }

    /// Relative-precision quantizer
    #[must_use]
    pub fn relative(tolerance: f32) -> Self {
        let bits = (-f64::from(tolerance).log2()).ceil();
        let keep_bits = if bits.is_finite() {
            (bits.max(1.0) as u32).min(MANTISSA_BITS)
        } else {
            MANTISSA_BITS
        };
        Self::Relative { keep_bits }
    }
}

/// Block-parallel, error-bounded codec
#[derive(Debug, Clone)]
pub struct LossyCodec {
    dims: GridDims,
    quantizer: Quantizer,
    block_size: usize,
    parallel: bool,
}

impl LossyCodec {
    /// Create a codec for frames of `dims`
    ///
    /// # Arguments
    ///
    /// * `dims` - Frame geometry; blocks are cut along z
    /// * `quantizer` - Error bound
    /// * `block_size` - z-planes per block
    /// * `parallel` - Run block (de)compression on the rayon pool
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero
    #[must_use]
    pub fn new(dims: GridDims, quantizer: Quantizer, block_size: usize, parallel: bool) -> Self {
        assert!(block_size > 0, "block size must be positive");
        Self {
            dims,
            quantizer,
            block_size,
            parallel,
        }
    }

    /// Samples per block (the last block of a frame may be shorter)
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.block_size * self.dims.plane_len()
    }

    /// Blocks per frame
    #[must_use]
    pub fn blocks_per_frame(&self) -> usize {
        self.dims.nz.div_ceil(self.block_size)
    }

    fn encode_frame(&self, frame: &[f32]) -> Result<Vec<Vec<u8>>, CodecError> {
        let block_len = self.block_len();
        if self.parallel {
            frame
                .par_chunks(block_len)
                .map(|block| self.encode_block(block))
                .collect()
        } else {
            frame
                .chunks(block_len)
                .map(|block| self.encode_block(block))
                .collect()
        }
    }

    fn encode_block(&self, samples: &[f32]) -> Result<Vec<u8>, CodecError> {
        let raw = match self.quantizer {
            Quantizer::Absolute { step } => quantize_absolute(samples, step)?,
            Quantizer::Relative { keep_bits } => quantize_relative(samples, keep_bits),
        };
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::fast());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }

    fn decode_block(&self, payload: &[u8], out: &mut [f32]) -> Result<(), CodecError> {
        let mut raw = Vec::with_capacity(out.len() * 4);
        DeflateDecoder::new(payload)
            .read_to_end(&mut raw)
            .map_err(|e| CodecError::Corrupt(e.to_string()))?;
        match self.quantizer {
            Quantizer::Absolute { step } => dequantize_absolute(&raw, step, out),
            Quantizer::Relative { .. } => unshuffle_relative(&raw, out),
        }
    }
}

impl FrameCodec for LossyCodec {
    fn name(&self) -> &'static str {
        match self.quantizer {
            Quantizer::Absolute { .. } => "lossy-absolute",
            Quantizer::Relative { .. } => "lossy-relative",
        }
    }

    fn is_lossy(&self) -> bool {
        true
    }

    fn encode(&self, frames: &[f32], count: usize, out: &mut dyn Write) -> Result<u64, CodecError> {
        let frame_len = self.dims.volume();
        check_frames(frames.len(), count, frame_len)?;

        let mut written = 0_u64;
        for (frame_index, frame) in frames.chunks_exact(frame_len).enumerate() {
            let payloads = self.encode_frame(frame)?;
            // Headers and payloads go out serially so block order is fixed
            for (block_index, payload) in payloads.iter().enumerate() {
                if payload.is_empty() {
                    return Err(CodecError::EmptyBlock {
                        frame: frame_index,
                        block: block_index,
                    });
                }
                out.write_all(&payload.len().to_ne_bytes())?;
                out.write_all(payload)?;
                written += (std::mem::size_of::<usize>() + payload.len()) as u64;
            }
        }
        Ok(written)
    }

    fn decode(&self, input: &mut dyn Read, count: usize, out: &mut [f32]) -> Result<u64, CodecError> {
        let frame_len = self.dims.volume();
        check_frames(out.len(), count, frame_len)?;

        let block_len = self.block_len();
        let max_payload = block_len * MAX_BYTES_PER_SAMPLE + BLOCK_SLACK_BYTES;
        let mut consumed = 0_u64;

        for (frame_index, frame) in out.chunks_exact_mut(frame_len).enumerate() {
            let mut payloads = Vec::with_capacity(self.blocks_per_frame());
            for block_index in 0..self.blocks_per_frame() {
                let mut header = [0_u8; std::mem::size_of::<usize>()];
                input.read_exact(&mut header)?;
                let len = usize::from_ne_bytes(header);
                if len == 0 {
                    return Err(CodecError::EmptyBlock {
                        frame: frame_index,
                        block: block_index,
                    });
                }
                if len > max_payload {
                    return Err(CodecError::BlockTooLarge {
                        frame: frame_index,
                        block: block_index,
                        len,
                    });
                }
                let mut payload = vec![0_u8; len];
                input.read_exact(&mut payload)?;
                consumed += (header.len() + len) as u64;
                payloads.push(payload);
            }

            if self.parallel {
                frame
                    .par_chunks_mut(block_len)
                    .zip(payloads.par_iter())
                    .try_for_each(|(block, payload)| self.decode_block(payload, block))?;
            } else {
                frame
                    .chunks_mut(block_len)
                    .zip(payloads.iter())
                    .try_for_each(|(block, payload)| self.decode_block(payload, block))?;
            }
        }
        Ok(consumed)
    }
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_varint(raw: &[u8], mut pos: usize) -> Result<(u64, usize), CodecError> {
    let mut value = 0_u64;
    for shift in (0..64).step_by(7) {
        let Some(&byte) = raw.get(pos) else {
            return Err(CodecError::Corrupt("varint runs past block end".to_string()));
        };
        pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
    }
    Err(CodecError::Corrupt("varint longer than 64 bits".to_string()))
}

fn quantize_absolute(samples: &[f32], step: f64) -> Result<Vec<u8>, CodecError> {
    let mut raw = Vec::with_capacity(samples.len() * 2);
    let mut previous = 0_i64;
    for &value in samples {
        if !value.is_finite() {
            return Err(CodecError::NonFinite(value));
        }
        let quantum = (f64::from(value) / step).round();
        if quantum.abs() > MAX_QUANTUM {
            return Err(CodecError::Unrepresentable {
                value,
                tolerance: step,
            });
        }
        let quantum = quantum as i64;
        push_varint(&mut raw, zigzag(quantum.wrapping_sub(previous)));
        previous = quantum;
    }
    Ok(raw)
}

fn dequantize_absolute(raw: &[u8], step: f64, out: &mut [f32]) -> Result<(), CodecError> {
    let mut pos = 0;
    let mut produced = 0;
    let mut previous = 0_i64;
    while pos < raw.len() {
        let (delta, next) = read_varint(raw, pos)?;
        pos = next;
        if let Some(slot) = out.get_mut(produced) {
            let quantum = previous.wrapping_add(unzigzag(delta));
            *slot = (quantum as f64 * step) as f32;
            previous = quantum;
        }
        produced += 1;
    }
    if produced == out.len() {
        Ok(())
    } else {
        Err(CodecError::LengthMismatch {
            expected: out.len(),
            actual: produced,
        })
    }
}

fn round_mantissa(value: f32, keep_bits: u32) -> u32 {
    let bits = value.to_bits();
    let shift = MANTISSA_BITS - keep_bits;
    // Subnormals carry fewer significant bits than the mantissa width
    if shift == 0 || !value.is_finite() || bits & EXPONENT_MASK == 0 {
        return bits;
    }
    let mask = !((1_u32 << shift) - 1);
    let rounded = bits.wrapping_add(1_u32 << (shift - 1)) & mask;
    if f32::from_bits(rounded).is_finite() {
        rounded
    } else {
        // Rounding carried into the infinity exponent, truncate instead
        bits & mask
    }
}

fn quantize_relative(samples: &[f32], keep_bits: u32) -> Vec<u8> {
    let n = samples.len();
    let mut raw = vec![0_u8; n * 4];
    for (i, &value) in samples.iter().enumerate() {
        let bytes = round_mantissa(value, keep_bits).to_le_bytes();
        for (plane, byte) in bytes.into_iter().enumerate() {
            raw[plane * n + i] = byte;
        }
    }
    raw
}

fn unshuffle_relative(raw: &[u8], out: &mut [f32]) -> Result<(), CodecError> {
    let n = out.len();
    if raw.len() != n * 4 {
        return Err(CodecError::LengthMismatch {
            expected: n,
            actual: raw.len() / 4,
        });
    }
    for (i, slot) in out.iter_mut().enumerate() {
        let bytes = [raw[i], raw[n + i], raw[2 * n + i], raw[3 * n + i]];
        *slot = f32::from_bits(u32::from_le_bytes(bytes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn wave(dims: GridDims, frames: usize) -> Vec<f32> {
        let w = dims.volume();
        (0..frames * w)
            .map(|i| {
                let t = (i / w) as f32;
                let k = (i % w) as f32;
                (0.37 * k + 0.11 * t).sin() * (1.0 + 0.01 * t)
            })
            .collect()
    }

    fn round_trip(codec: &LossyCodec, frames: &[f32], count: usize) -> (Vec<f32>, usize) {
        let mut encoded = Vec::new();
        let written = codec.encode(frames, count, &mut encoded).unwrap();
        assert_eq!(written as usize, encoded.len());
        let mut decoded = vec![0.0; frames.len()];
        let mut input = encoded.as_slice();
        let read = codec.decode(&mut input, count, &mut decoded).unwrap();
        assert_eq!(read, written);
        assert!(input.is_empty());
        (decoded, encoded.len())
    }

    #[test]
    fn test_absolute_tolerance_holds() {
        let dims = GridDims::new(12, 5, 9);
        let tolerance = 1e-3;
        let codec = LossyCodec::new(dims, Quantizer::absolute(tolerance), 4, true);
        let frames = wave(dims, 3);
        let (decoded, _) = round_trip(&codec, &frames, 3);
        for (&a, &b) in frames.iter().zip(decoded.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = tolerance);
        }
    }

    #[test]
    fn test_relative_tolerance_holds_elementwise() {
        let dims = GridDims::planar(64, 10);
        let tolerance = 1e-3;
        let codec = LossyCodec::new(dims, Quantizer::relative(tolerance), 4, false);
        let frames: Vec<f32> = wave(dims, 2).iter().map(|v| v * 1e4 + 0.5).collect();
        let (decoded, _) = round_trip(&codec, &frames, 2);
        for (&a, &b) in frames.iter().zip(decoded.iter()) {
            assert!((a - b).abs() <= tolerance * a.abs(), "{a} vs {b}");
        }
    }

    #[test]
    fn test_relative_mode_keeps_subnormals_exact() {
        let dims = GridDims::planar(4, 1);
        let tolerance = 1e-3;
        let codec = LossyCodec::new(dims, Quantizer::relative(tolerance), 4, false);
        let frames = [1e-40_f32, 3e-42, 1e-45, 5.0];
        let (decoded, _) = round_trip(&codec, &frames, 1);
        for (&a, &b) in frames.iter().zip(&decoded) {
            assert!((a - b).abs() <= tolerance * a.abs(), "{a} -> {b}");
        }
        assert_eq!(decoded[..3], frames[..3]);
    }

    #[test]
    fn test_relative_keep_bits() {
        assert_eq!(Quantizer::relative(1e-3), Quantizer::Relative { keep_bits: 10 });
        assert_eq!(Quantizer::relative(0.5), Quantizer::Relative { keep_bits: 1 });
        assert_eq!(Quantizer::relative(1e-12), Quantizer::Relative { keep_bits: 23 });
    }

    #[test]
    fn test_parallel_and_serial_streams_match() {
        let dims = GridDims::new(7, 3, 10);
        let frames = wave(dims, 2);
        let serial = LossyCodec::new(dims, Quantizer::absolute(1e-2), 4, false);
        let parallel = LossyCodec::new(dims, Quantizer::absolute(1e-2), 4, true);
        let mut a = Vec::new();
        let mut b = Vec::new();
        serial.encode(&frames, 2, &mut a).unwrap();
        parallel.encode(&frames, 2, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stream_layout_has_length_prefixed_blocks() {
        let dims = GridDims::planar(16, 10);
        let codec = LossyCodec::new(dims, Quantizer::absolute(1e-2), 4, false);
        assert_eq!(codec.blocks_per_frame(), 3);
        let frames = wave(dims, 2);
        let mut encoded = Vec::new();
        codec.encode(&frames, 2, &mut encoded).unwrap();

        let word = std::mem::size_of::<usize>();
        let mut pos = 0;
        let mut blocks = 0;
        while pos < encoded.len() {
            let len = usize::from_ne_bytes(encoded[pos..pos + word].try_into().unwrap());
            assert!(len > 0);
            pos += word + len;
            blocks += 1;
        }
        assert_eq!(pos, encoded.len());
        assert_eq!(blocks, 2 * 3);
    }

    #[test]
    fn test_smooth_fields_compress() {
        let dims = GridDims::planar(128, 64);
        let codec = LossyCodec::new(dims, Quantizer::absolute(1e-3), 4, true);
        let frames = wave(dims, 1);
        let (_, encoded_len) = round_trip(&codec, &frames, 1);
        assert!(encoded_len < frames.len() * 4);
    }

    #[test]
    fn test_non_finite_rejected_in_absolute_mode() {
        let dims = GridDims::planar(4, 1);
        let codec = LossyCodec::new(dims, Quantizer::absolute(1e-3), 4, false);
        let mut sink = Vec::new();
        let err = codec
            .encode(&[0.0, f32::INFINITY, 1.0, 2.0], 1, &mut sink)
            .unwrap_err();
        assert!(matches!(err, CodecError::NonFinite(v) if v.is_infinite()));
    }

    #[test]
    fn test_zero_length_block_rejected() {
        let dims = GridDims::planar(4, 4);
        let codec = LossyCodec::new(dims, Quantizer::absolute(1e-3), 4, false);
        let stream = 0_usize.to_ne_bytes();
        let mut out = vec![0.0; 16];
        let err = codec.decode(&mut stream.as_slice(), 1, &mut out).unwrap_err();
        assert!(matches!(err, CodecError::EmptyBlock { frame: 0, block: 0 }));
    }

    #[test]
    fn test_corrupt_payload_rejected() {
        let dims = GridDims::planar(4, 4);
        let codec = LossyCodec::new(dims, Quantizer::absolute(1e-3), 4, false);
        let mut stream = 5_usize.to_ne_bytes().to_vec();
        stream.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff]);
        let mut out = vec![0.0; 16];
        let err = codec.decode(&mut stream.as_slice(), 1, &mut out).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt(_)));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let dims = GridDims::planar(4, 4);
        let codec = LossyCodec::new(dims, Quantizer::absolute(1e-3), 4, false);
        let stream = usize::MAX.to_ne_bytes();
        let mut out = vec![0.0; 16];
        let err = codec.decode(&mut stream.as_slice(), 1, &mut out).unwrap_err();
        assert!(matches!(err, CodecError::BlockTooLarge { .. }));
    }

    #[test]
    fn test_zigzag_varint() {
        for value in [0_i64, 1, -1, 63, -64, 1 << 40, -(1 << 52)] {
            let mut raw = Vec::new();
            push_varint(&mut raw, zigzag(value));
            let (decoded, pos) = read_varint(&raw, 0).unwrap();
            assert_eq!(pos, raw.len());
            assert_eq!(unzigzag(decoded), value);
        }
    }

    #[test]
    fn test_round_mantissa_saturates_without_overflow() {
        let rounded = f32::from_bits(round_mantissa(f32::MAX, 1));
        assert!(rounded.is_finite());
        assert_eq!(round_mantissa(f32::NAN, 4), f32::NAN.to_bits());
    }
}
