//! Typed views into the device ring
//!
//! The engine never hands out untracked pointers. A lease names the slots a
//! kernel may touch for one step, as sample offsets into the ring it owns.

use std::ops::Range;

use crate::layout::ReplayLayout;

/// One ring slot, addressed in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlot {
    /// Slot index (`t % D`)
    pub slot: usize,
    /// First sample of the slot inside the ring
    pub offset: usize,
    /// Samples in the slot (`W`)
    pub len: usize,
}

impl FrameSlot {
    pub(crate) const fn new(slot: usize, frame_len: usize) -> Self {
        Self {
            slot,
            offset: slot * frame_len,
            len: frame_len,
        }
    }

    /// Sample range of the slot inside the ring
    #[must_use]
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Slots leased to the forward kernel after frame `time_step` was saved
///
/// `current` holds frame `time_step`; the kernel writes frame `time_step + 1`
/// into `next`. Second-order schemes also read `previous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLease {
    /// Frame just committed
    pub time_step: usize,
    /// Slot of the committed frame
    pub current: FrameSlot,
    /// Slot the next step writes
    pub next: FrameSlot,
    /// Slot of the frame before `current`
    pub previous: Option<FrameSlot>,
}

impl StepLease {
    pub(crate) fn new(layout: &ReplayLayout, t: usize, frame_len: usize, second_order: bool) -> Self {
        let d = layout.device_frames();
        Self {
            time_step: t,
            current: FrameSlot::new(t % d, frame_len),
            next: FrameSlot::new((t + 1) % d, frame_len),
            previous: second_order.then(|| FrameSlot::new((t + d - 1) % d, frame_len)),
        }
    }
}

/// Slot holding a replayed frame during the backward sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayLease {
    /// Frame replayed
    pub time_step: usize,
    /// Slot holding it
    pub frame: FrameSlot,
}

impl ReplayLease {
    pub(crate) fn new(layout: &ReplayLayout, t: usize, frame_len: usize) -> Self {
        Self {
            time_step: t,
            frame: FrameSlot::new(layout.device_slot(t), frame_len),
        }
    }
}
