//! Index arithmetic shared by the forward and backward sweeps
//!
//! Frame `t` lives in segment `t / H` at offset `t % H`, and in device slot
//! `t % D` while staged. Both sweeps derive every index from the same
//! `ReplayLayout`, so writes and reads always agree.

/// Tier capacities of one run
///
/// # Invariants
///
/// - `device_frames > 0`
/// - `host_frames % device_frames == 0`
/// - `total_frames > 0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplayLayout {
    device_frames: usize,
    host_frames: usize,
    total_frames: usize,
}

impl ReplayLayout {
    /// Create a layout
    ///
    /// # Panics
    ///
    /// Panics if any capacity is zero or `host_frames` is not a multiple of
    /// `device_frames`
    #[must_use]
    pub fn new(device_frames: usize, host_frames: usize, total_frames: usize) -> Self {
        assert!(device_frames > 0, "device ring must hold at least one frame");
        assert!(total_frames > 0, "run must contain at least one frame");
        assert!(
            host_frames > 0 && host_frames % device_frames == 0,
            "host capacity {host_frames} is not a multiple of device capacity {device_frames}"
        );
        Self {
            device_frames,
            host_frames,
            total_frames,
        }
    }

    /// Device ring capacity (`D`)
    #[must_use]
    pub const fn device_frames(&self) -> usize {
        self.device_frames
    }

    /// Host staging capacity (`H`)
    #[must_use]
    pub const fn host_frames(&self) -> usize {
        self.host_frames
    }

    /// Frames in the run (`NT + 1`)
    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Last time step of the run (`NT`)
    #[must_use]
    pub const fn last_step(&self) -> usize {
        self.total_frames - 1
    }

    /// `R = H / D`
    #[must_use]
    pub const fn ratio(&self) -> usize {
        self.host_frames / self.device_frames
    }

    /// `true` when one host buffer holds the entire run
    #[must_use]
    pub const fn host_holds_run(&self) -> bool {
        self.host_frames >= self.total_frames
    }

    /// Number of segment files the run produces
    #[must_use]
    pub const fn segment_count(&self) -> usize {
        self.total_frames.div_ceil(self.host_frames)
    }

    /// Segment holding frame `t`
    #[must_use]
    pub const fn segment_of(&self, t: usize) -> usize {
        t / self.host_frames
    }

    /// Offset of frame `t` inside its segment (and inside the host buffer)
    #[must_use]
    pub const fn segment_offset(&self, t: usize) -> usize {
        t % self.host_frames
    }

    /// Frames stored in segment `segment`
    #[must_use]
    pub fn segment_len(&self, segment: usize) -> usize {
        let first = segment * self.host_frames;
        debug_assert!(first < self.total_frames, "segment {segment} is past the run");
        self.host_frames.min(self.total_frames - first)
    }

    /// Frame counts of every segment, in order
    #[must_use]
    pub fn segment_sizes(&self) -> Vec<usize> {
        (0..self.segment_count())
            .map(|segment| self.segment_len(segment))
            .collect()
    }

    /// Device slot of frame `t`
    #[must_use]
    pub const fn device_slot(&self, t: usize) -> usize {
        t % self.device_frames
    }

    /// Device block holding frame `t`
    #[must_use]
    pub const fn device_block(&self, t: usize) -> usize {
        t / self.device_frames
    }

    /// Frames in device block `block`
    #[must_use]
    pub fn device_block_len(&self, block: usize) -> usize {
        let first = block * self.device_frames;
        debug_assert!(first < self.total_frames, "block {block} is past the run");
        self.device_frames.min(self.total_frames - first)
    }

    /// First host frame of device block `block`
    #[must_use]
    pub const fn host_block_offset(&self, block: usize) -> usize {
        (block % self.ratio()) * self.device_frames
    }

    /// Forward sweep: saving `t` completes its device block
    #[must_use]
    pub const fn closes_device_block(&self, t: usize) -> bool {
        (t + 1) % self.device_frames == 0 || t + 1 == self.total_frames
    }

    /// Forward sweep: saving `t` completes its segment
    #[must_use]
    pub const fn closes_segment(&self, t: usize) -> bool {
        (t + 1) % self.host_frames == 0 || t + 1 == self.total_frames
    }

    /// Backward sweep: `t` is the first frame replayed from its device block
    #[must_use]
    pub const fn opens_device_block(&self, t: usize) -> bool {
        self.closes_device_block(t)
    }

    /// Backward sweep: `t` is the first frame replayed from its segment
    #[must_use]
    pub const fn opens_segment(&self, t: usize) -> bool {
        self.closes_segment(t)
    }
}
