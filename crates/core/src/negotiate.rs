//! Capacity negotiation for the host staging buffer
//!
//! The engine first asks for room to hold the whole run. Each failed attempt
//! halves the request, rounded down to whole device blocks, until an
//! allocation succeeds or the floor is reached. The search is a pure function
//! over an allocator closure so it can be exercised with a fake allocator.

use tracing::{debug, warn};

use crate::error::ReplayError;

/// Parameters of one negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityRequest {
    /// Frames wanted (`NT + 1`)
    pub frames: usize,
    /// Every candidate is a multiple of this (`D`)
    pub unit: usize,
    /// Smallest viable candidate, itself a multiple of `unit`
    pub floor: usize,
    /// Samples per frame, reported on exhaustion
    pub frame_len: usize,
    /// Halve once more after a constrained success
    pub reserve_headroom: bool,
}

impl CapacityRequest {
    /// Request with the floor set to one device block
    #[must_use]
    pub fn new(frames: usize, unit: usize, frame_len: usize) -> Self {
        Self {
            frames,
            unit,
            floor: unit,
            frame_len,
            reserve_headroom: false,
        }
    }

    /// Set headroom reservation
    #[must_use]
    pub fn with_reserve_headroom(mut self, reserve: bool) -> Self {
        self.reserve_headroom = reserve;
        self
    }

    fn first_candidate(&self) -> usize {
        self.frames.div_ceil(self.unit).max(1) * self.unit
    }

    fn candidate_after(&self, halvings: u32) -> usize {
        let frames = self.frames.checked_shr(halvings).unwrap_or(0);
        ((frames / self.unit) * self.unit).max(self.floor)
    }
}

/// Outcome of a successful negotiation
#[derive(Debug)]
pub struct Negotiation<B> {
    /// The allocation that succeeded
    pub buffer: B,
    /// Frames the buffer holds (`H`)
    pub frames: usize,
    /// Frames originally requested
    pub requested: usize,
    /// Allocation attempts made, including the successful one
    pub attempts: usize,
}

impl<B> Negotiation<B> {
    /// `true` when the buffer holds every requested frame
    #[must_use]
    pub fn is_sufficient(&self) -> bool {
        self.frames >= self.requested
    }
}

/// Size a buffer by halving until `allocate` succeeds
///
/// `allocate` receives a frame count and returns `None` when that many frames
/// cannot be held.
///
/// # Errors
///
/// [`ReplayError::AllocationExhausted`] when the floor itself cannot be
/// allocated.
///
/// # Panics
///
/// Panics if `unit` is zero or `floor` is not a positive multiple of `unit`
pub fn negotiate<B, F>(request: &CapacityRequest, mut allocate: F) -> Result<Negotiation<B>, ReplayError>
where
    F: FnMut(usize) -> Option<B>,
{
    assert!(request.unit > 0, "negotiation unit must be positive");
    assert!(
        request.floor >= request.unit && request.floor % request.unit == 0,
        "floor {} must be a positive multiple of unit {}",
        request.floor,
        request.unit
    );

    let exhausted = || ReplayError::AllocationExhausted {
        floor: request.floor,
        frame_len: request.frame_len,
    };

    let mut candidate = request.first_candidate();
    let mut halvings = 0_u32;
    let mut attempts = 0_usize;

    let (buffer, frames) = loop {
        attempts += 1;
        debug!(frames = candidate, attempt = attempts, "Requesting host staging buffer");
        if let Some(buffer) = allocate(candidate) {
            break (buffer, candidate);
        }
        if candidate <= request.floor {
            return Err(exhausted());
        }
        halvings += 1;
        candidate = request.candidate_after(halvings);
    };

    if attempts == 1 || !request.reserve_headroom || frames <= request.floor {
        return Ok(Negotiation {
            buffer,
            frames,
            requested: request.frames,
            attempts,
        });
    }

    // Constrained: give the largest fitting buffer back and settle one step lower
    drop(buffer);
    let reduced = request.candidate_after(halvings + 1);
    attempts += 1;
    warn!(
        from = frames,
        to = reduced,
        "Reserving headroom below the largest host buffer that fit"
    );
    let buffer = allocate(reduced).ok_or_else(exhausted)?;
    Ok(Negotiation {
        buffer,
        frames: reduced,
        requested: request.frames,
        attempts,
    })
}
