//! Host-memory device ring
//!
//! Used when no accelerator is available and by every embedder that runs its
//! stencil on the CPU. The kernel works inside the ring through [`StepView`],
//! so step results land in their checkpoint slot without a copy.

use std::borrow::Cow;

use super::{check_slots, whole_frames, DeviceRing};
use crate::error::DeviceError;

/// Ring of `slots` frames in a single `Vec<f32>`
#[derive(Debug, Clone)]
pub struct HostRing {
    data: Vec<f32>,
    slots: usize,
    frame_len: usize,
}

/// Simultaneous borrows of the slots leased for one step
#[derive(Debug)]
pub struct StepView<'a> {
    /// Frame the step reads
    pub current: &'a [f32],
    /// Frame the step writes
    pub next: &'a mut [f32],
    /// Frame before `current`, for second-order schemes
    pub previous: Option<&'a [f32]>,
}

impl HostRing {
    /// Zeroed ring
    #[must_use]
    pub fn new(slots: usize, frame_len: usize) -> Self {
        Self {
            data: vec![0.0; slots * frame_len],
            slots,
            frame_len,
        }
    }

    /// Borrow the `current`, `next` and optional `previous` slots at once
    ///
    /// # Errors
    ///
    /// [`DeviceError::OutOfRange`] if a slot is past the ring or two slots
    /// coincide
    pub fn step_view(
        &mut self,
        current: usize,
        next: usize,
        previous: Option<usize>,
    ) -> Result<StepView<'_>, DeviceError> {
        let capacity = self.slots;
        let out_of_range = |slot: usize| DeviceError::OutOfRange {
            first: slot,
            end: slot + 1,
            capacity,
        };
        for slot in [Some(current), Some(next), previous].into_iter().flatten() {
            if slot >= capacity {
                return Err(out_of_range(slot));
            }
        }
        if current == next {
            return Err(out_of_range(next));
        }
        if let Some(p) = previous.filter(|&p| p == current || p == next) {
            return Err(out_of_range(p));
        }

        // `next` is the only mutable slot; everything else is read through
        // the shared halves on either side of it
        let w = self.frame_len;
        let (head, rest) = self.data.split_at_mut(next * w);
        let (next_frame, tail) = rest.split_at_mut(w);
        let (head, tail) = (&*head, &*tail);
        let shared = |slot: usize| frame_around(head, tail, next, w, slot);

        Ok(StepView {
            current: shared(current),
            next: next_frame,
            previous: previous.map(shared),
        })
    }

    /// Base pointer of the ring, for C callers that index slots themselves
    pub fn as_mut_ptr(&mut self) -> *mut f32 {
        self.data.as_mut_ptr()
    }

    /// Whole ring
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    fn span(&self, first: usize, count: usize) -> std::ops::Range<usize> {
        first * self.frame_len..(first + count) * self.frame_len
    }
}

impl DeviceRing for HostRing {
    fn slots(&self) -> usize {
        self.slots
    }

    fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn zero_slot(&mut self, slot: usize) -> Result<(), DeviceError> {
        check_slots(slot, 1, self.slots)?;
        let span = self.span(slot, 1);
        self.data[span].fill(0.0);
        Ok(())
    }

    fn upload(&mut self, first_slot: usize, src: &[f32]) -> Result<(), DeviceError> {
        let count = whole_frames(src.len(), self.frame_len)?;
        check_slots(first_slot, count, self.slots)?;
        let span = self.span(first_slot, count);
        self.data[span].copy_from_slice(src);
        Ok(())
    }

    fn download(&self, first_slot: usize, dst: &mut [f32]) -> Result<(), DeviceError> {
        let count = whole_frames(dst.len(), self.frame_len)?;
        check_slots(first_slot, count, self.slots)?;
        dst.copy_from_slice(&self.data[self.span(first_slot, count)]);
        Ok(())
    }

    fn read_slot(&self, slot: usize) -> Result<Cow<'_, [f32]>, DeviceError> {
        check_slots(slot, 1, self.slots)?;
        Ok(Cow::Borrowed(&self.data[self.span(slot, 1)]))
    }

    fn is_gpu_accelerated(&self) -> bool {
        false
    }
}

/// Frame `slot` of a ring split around the `next` slot.
fn frame_around<'a>(head: &'a [f32], tail: &'a [f32], next: usize, w: usize, slot: usize) -> &'a [f32] {
    if slot < next {
        &head[slot * w..(slot + 1) * w]
    } else {
        &tail[(slot - next - 1) * w..(slot - next) * w]
    }
}
