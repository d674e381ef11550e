//! Host staging buffer
//!
//! Holds `H` consecutive frames: the unit of transfer to and from the segment
//! store, and the source/destination of device block transfers.

/// Contiguous host memory for `frames * frame_len` samples
#[derive(Debug)]
pub struct HostStaging {
    data: Vec<f32>,
    frames: usize,
    frame_len: usize,
}

impl HostStaging {
    /// Try to allocate room for `frames` frames
    ///
    /// Returns `None` when the size overflows, exceeds `limit_bytes`, or the
    /// allocator refuses the reservation. Memory is zero-initialized.
    #[must_use]
    pub fn try_allocate(frames: usize, frame_len: usize, limit_bytes: Option<usize>) -> Option<Self> {
        let samples = frames.checked_mul(frame_len)?;
        let bytes = samples.checked_mul(std::mem::size_of::<f32>())?;
        if limit_bytes.is_some_and(|limit| bytes > limit) {
            return None;
        }

        let mut data = Vec::new();
        data.try_reserve_exact(samples).ok()?;
        data.resize(samples, 0.0);

        Some(Self {
            data,
            frames,
            frame_len,
        })
    }

    /// Capacity in frames (`H`)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples per frame (`W`)
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// `count` frames starting at host frame `first`
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer
    #[must_use]
    pub fn block(&self, first: usize, count: usize) -> &[f32] {
        let range = self.sample_range(first, count);
        &self.data[range]
    }

    /// Mutable `count` frames starting at host frame `first`
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer
    pub fn block_mut(&mut self, first: usize, count: usize) -> &mut [f32] {
        let range = self.sample_range(first, count);
        &mut self.data[range]
    }

    /// One frame
    #[must_use]
    pub fn frame(&self, index: usize) -> &[f32] {
        self.block(index, 1)
    }

    fn sample_range(&self, first: usize, count: usize) -> std::ops::Range<usize> {
        assert!(
            first + count <= self.frames,
            "host frames {first}..{} exceed capacity {}",
            first + count,
            self.frames
        );
        first * self.frame_len..(first + count) * self.frame_len
    }
}
