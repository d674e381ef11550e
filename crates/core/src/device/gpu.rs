//! wgpu storage-buffer ring
//!
//! The ring is one `STORAGE | COPY_SRC | COPY_DST` buffer so a GPU stencil can
//! bind slot ranges directly. Transfers block: uploads and clears are flushed
//! with a submit and `Maintain::Wait`, downloads go through a mapped readback
//! buffer of the same size.

use std::borrow::Cow;

use tracing::debug;

use super::{check_slots, whole_frames, DeviceRing, GpuContext};
use crate::error::DeviceError;

const SAMPLE_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Device ring resident in GPU memory
#[derive(Debug)]
pub struct GpuRing {
    context: GpuContext,
    ring: wgpu::Buffer,
    readback: wgpu::Buffer,
    slots: usize,
    frame_len: usize,
}

impl GpuRing {
    /// Allocate a zeroed ring of `slots` frames
    #[must_use]
    pub fn new(context: GpuContext, slots: usize, frame_len: usize) -> Self {
        let size = (slots * frame_len) as u64 * SAMPLE_BYTES;
        let device = context.device();

        let ring = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Replay Device Ring"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Replay Ring Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            context,
            ring,
            readback,
            slots,
            frame_len,
        }
    }

    /// Storage buffer holding every slot, for binding in a GPU stencil
    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.ring
    }

    /// Context owning the ring
    #[must_use]
    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn byte_span(&self, first: usize, count: usize) -> (u64, u64) {
        let frame_bytes = self.frame_len as u64 * SAMPLE_BYTES;
        (first as u64 * frame_bytes, count as u64 * frame_bytes)
    }

    /// Block until submitted work completes; `true` when the queue drained
    fn wait(&self) -> bool {
        let drained = self
            .context
            .device()
            .poll(wgpu::Maintain::Wait)
            .is_queue_empty();
        if !drained {
            debug!("GPU queue still has submissions after wait");
        }
        drained
    }
}

impl DeviceRing for GpuRing {
    fn slots(&self) -> usize {
        self.slots
    }

    fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn zero_slot(&mut self, slot: usize) -> Result<(), DeviceError> {
        check_slots(slot, 1, self.slots)?;
        let (offset, size) = self.byte_span(slot, 1);
        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Ring Clear Encoder"),
                });
        encoder.clear_buffer(&self.ring, offset, Some(size));
        self.context.queue().submit(std::iter::once(encoder.finish()));
        self.wait();
        Ok(())
    }

    fn upload(&mut self, first_slot: usize, src: &[f32]) -> Result<(), DeviceError> {
        let count = whole_frames(src.len(), self.frame_len)?;
        check_slots(first_slot, count, self.slots)?;
        if count == 0 {
            return Ok(());
        }
        let (offset, _) = self.byte_span(first_slot, count);
        self.context
            .queue()
            .write_buffer(&self.ring, offset, bytemuck::cast_slice(src));
        self.context.queue().submit(std::iter::empty());
        self.wait();
        Ok(())
    }

    fn download(&self, first_slot: usize, dst: &mut [f32]) -> Result<(), DeviceError> {
        let count = whole_frames(dst.len(), self.frame_len)?;
        check_slots(first_slot, count, self.slots)?;
        if count == 0 {
            return Ok(());
        }
        let (offset, size) = self.byte_span(first_slot, count);

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Ring Readback Encoder"),
                });
        encoder.copy_buffer_to_buffer(&self.ring, offset, &self.readback, 0, size);
        self.context.queue().submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait();
        rx.recv()
            .map_err(|e| DeviceError::Readback(e.to_string()))?
            .map_err(|e| DeviceError::Readback(e.to_string()))?;

        {
            let data = slice.get_mapped_range();
            dst.copy_from_slice(bytemuck::cast_slice(&data));
        }
        self.readback.unmap();
        Ok(())
    }

    fn read_slot(&self, slot: usize) -> Result<Cow<'_, [f32]>, DeviceError> {
        let mut frame = vec![0.0; self.frame_len];
        self.download(slot, &mut frame)?;
        Ok(Cow::Owned(frame))
    }

    fn is_gpu_accelerated(&self) -> bool {
        true
    }
}
