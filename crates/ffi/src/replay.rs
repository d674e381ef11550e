use std::ptr;

use rtm_replay_core::{Phase, WavefieldBinding};

use crate::error::{DefaultReplayFfiError, RtmReplayErrorCode};
use crate::helpers::{handle_ffi_result_error, instance_from_ptr, with_engine_mut, write_optional};
use crate::instance::RtmReplayInstance;

/// Sweep selector for `rtm_replay_reset_grid`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtmPhase {
    /// Save frames `0..=NT` in increasing order.
    Forward = 0,
    /// Fetch frames `NT..=0` in decreasing order.
    Backward = 1,
}

/// Ring slots leased to the kernel after a frame was saved.
///
/// All pointers address `frame_len` samples inside the engine's device ring.
/// They stay valid until the next call on the same instance.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RtmStepPointers {
    /// Frame just saved; the kernel reads it.
    pub current: *const f32,
    /// Slot the kernel writes the next frame into.
    pub next: *mut f32,
    /// Frame before `current`; null for first-order runs.
    pub previous: *const f32,
    /// Samples per frame.
    pub frame_len: usize,
}

/// Start the forward or backward sweep.
///
/// `out_uses_ring` (optional) receives `true` when the kernel must step
/// through the pointers from `rtm_replay_save_forward`, and `false` when it
/// must use its own zeroed buffers (backward sweep).
///
/// The first forward sweep negotiates the host staging buffer. Every forward
/// sweep removes segment files left by an earlier shot.
///
/// # Safety
/// - `ptr` must be null or a live pointer from `rtm_replay_new`.
/// - `out_uses_ring` must be null or point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn rtm_replay_reset_grid(
    ptr: *const RtmReplayInstance,
    phase: RtmPhase,
    out_uses_ring: *mut bool,
) -> RtmReplayErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        let phase = match phase {
            RtmPhase::Forward => Phase::Forward,
            RtmPhase::Backward => Phase::Backward,
        };
        let binding = with_engine_mut(instance, |engine| Ok(engine.reset_grid(phase)?))?;
        write_optional(out_uses_ring, binding == WavefieldBinding::Checkpoint);
        Ok(())
    })
}

/// Save frame `t`, which the kernel has already placed in its ring slot.
///
/// Frame 0 is the zeroed slot prepared by `rtm_replay_reset_grid`; every
/// later frame is the `next` slot leased by the previous call. On success
/// `out_pointers` holds the slots for computing frame `t + 1`.
///
/// Returns `Cursor` unless `t` is exactly one past the previous save.
///
/// # Safety
/// - `ptr` must be null or a live pointer from `rtm_replay_new`.
/// - `out_pointers` must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn rtm_replay_save_forward(
    ptr: *const RtmReplayInstance,
    t: usize,
    out_pointers: *mut RtmStepPointers,
) -> RtmReplayErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if out_pointers.is_null() {
            return Err(DefaultReplayFfiError::null_pointer("out_pointers"));
        }
        let pointers = with_engine_mut(instance, |engine| {
            let lease = engine.save_forward(t)?;
            let base = engine.device_mut().as_mut_ptr();
            // SAFETY: lease offsets lie inside the ring the base pointer addresses.
            let pointers = unsafe {
                RtmStepPointers {
                    current: base.add(lease.current.offset).cast_const(),
                    next: base.add(lease.next.offset),
                    previous: lease
                        .previous
                        .map_or(ptr::null(), |p| base.add(p.offset).cast_const()),
                    frame_len: lease.current.len,
                }
            };
            Ok(pointers)
        })?;
        write_optional(out_pointers, pointers);
        Ok(())
    })
}

/// Bring frame `t` back into the ring during the backward sweep.
///
/// `out_frame` (optional) receives a read-only pointer to the replayed
/// frame, valid until the next call on this instance. Use
/// `rtm_replay_forward_grid` to copy it instead.
///
/// Returns `Cursor` unless `t` is exactly one before the previous fetch
/// (or `NT` for the first fetch).
///
/// # Safety
/// - `ptr` must be null or a live pointer from `rtm_replay_new`.
/// - `out_frame` must be null or point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn rtm_replay_fetch_forward(
    ptr: *const RtmReplayInstance,
    t: usize,
    out_frame: *mut *const f32,
) -> RtmReplayErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        let frame = with_engine_mut(instance, |engine| {
            let lease = engine.fetch_forward(t)?;
            let base = engine.device_mut().as_mut_ptr();
            // SAFETY: the lease slot lies inside the ring.
            Ok(unsafe { base.add(lease.frame.offset).cast_const() })
        })?;
        write_optional(out_frame, frame);
        Ok(())
    })
}

/// Copy the frame of the most recent `rtm_replay_fetch_forward` into `out`.
///
/// `len` must equal the frame length (`nx * ny * nz`).
///
/// # Safety
/// - `ptr` must be null or a live pointer from `rtm_replay_new`.
/// - `out` must point to `len` writable floats.
#[no_mangle]
pub unsafe extern "C" fn rtm_replay_forward_grid(
    ptr: *const RtmReplayInstance,
    out: *mut f32,
    len: usize,
) -> RtmReplayErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if out.is_null() {
            return Err(DefaultReplayFfiError::null_pointer("out"));
        }
        with_engine_mut(instance, |engine| {
            let frame = engine.forward_frame()?;
            if frame.len() != len {
                return Err(DefaultReplayFfiError::invalid_parameter(
                    "len",
                    &format!("frame holds {} samples, got {len}", frame.len()),
                ));
            }
            // SAFETY: `out` is non-null and holds `len` floats per the contract.
            let dst = unsafe { std::slice::from_raw_parts_mut(out, len) };
            dst.copy_from_slice(&frame);
            Ok(())
        })
    })
}

/// Frames held by the host staging buffer (`H`), or 0 before the first
/// forward sweep negotiated it.
///
/// # Safety
/// - `ptr` must be null or a live pointer from `rtm_replay_new`.
/// - `out_frames` must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn rtm_replay_host_frames(
    ptr: *const RtmReplayInstance,
    out_frames: *mut usize,
) -> RtmReplayErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if out_frames.is_null() {
            return Err(DefaultReplayFfiError::null_pointer("out_frames"));
        }
        let frames = with_engine_mut(instance, |engine| Ok(engine.host_frames().unwrap_or(0)))?;
        write_optional(out_frames, frames);
        Ok(())
    })
}

/// Whether the host staging buffer holds the whole run (`H >= NT + 1`).
///
/// Diagnostic only; replay behaves the same either way.
///
/// # Safety
/// - `ptr` must be null or a live pointer from `rtm_replay_new`.
/// - `out_sufficient` must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn rtm_replay_is_host_memory_sufficient(
    ptr: *const RtmReplayInstance,
    out_sufficient: *mut bool,
) -> RtmReplayErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if out_sufficient.is_null() {
            return Err(DefaultReplayFfiError::null_pointer("out_sufficient"));
        }
        let sufficient = with_engine_mut(instance, |engine| Ok(engine.is_host_memory_sufficient()))?;
        write_optional(out_sufficient, sufficient);
        Ok(())
    })
}
