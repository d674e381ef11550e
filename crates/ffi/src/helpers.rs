use std::sync::MutexGuard;

use rtm_replay_core::ReplayEngine;

use crate::error::{with_last_error_mut, DefaultReplayFfiError, ReplayFfiError, RtmReplayErrorCode};
use crate::instance::RtmReplayInstance;

/// Set the thread-local error message and code.
/// Accepts any type implementing `ReplayFfiError` trait.
pub(crate) fn set_last_error(error: &impl ReplayFfiError) {
    with_last_error_mut(|(cstring, code)| {
        *cstring = std::ffi::CString::new(error.msg()).ok();
        *code = error.code();
    });
}

/// Track an error by setting it in thread-local storage and returning its code.
#[inline]
pub(crate) fn track_error(error: &impl ReplayFfiError) -> RtmReplayErrorCode {
    set_last_error(error);
    error.code()
}

/// Clear the thread-local error message and code.
/// Called on successful operations.
pub(crate) fn clear_last_error() {
    with_last_error_mut(|(cstring, code)| {
        *cstring = None;
        *code = RtmReplayErrorCode::Ok;
    });
}

/// Record the outcome of `f` and collapse it into an error code.
pub(crate) fn handle_ffi_result_error<F>(f: F) -> RtmReplayErrorCode
where
    F: FnOnce() -> Result<(), DefaultReplayFfiError>,
{
    match f() {
        Ok(()) => {
            clear_last_error();
            RtmReplayErrorCode::Ok
        }
        Err(err) => {
            tracing::debug!(code = ?err.code(), message = err.msg(), "FFI call failed");
            track_error(&err)
        }
    }
}

/// Borrow an instance from a raw pointer.
pub(crate) fn instance_from_ptr<'a>(
    ptr: *const RtmReplayInstance,
) -> Result<&'a RtmReplayInstance, DefaultReplayFfiError> {
    // SAFETY: callers guarantee `ptr` is null or came from `rtm_replay_new`
    // and has not been destroyed.
    unsafe { ptr.as_ref() }.ok_or_else(|| DefaultReplayFfiError::null_pointer("ptr"))
}

/// Lock the engine of `instance` and run `f` on it.
pub(crate) fn with_engine_mut<F, T>(
    instance: &RtmReplayInstance,
    f: F,
) -> Result<T, DefaultReplayFfiError>
where
    F: FnOnce(&mut ReplayEngine) -> Result<T, DefaultReplayFfiError>,
{
    let mut engine: MutexGuard<'_, ReplayEngine> = instance
        .engine
        .lock()
        .map_err(|_| DefaultReplayFfiError::lock_poisoned("Mutex"))?;
    f(&mut engine)
}

/// Write `value` through `out` if the caller asked for it.
pub(crate) fn write_optional<T>(out: *mut T, value: T) {
    if !out.is_null() {
        // SAFETY: non-null out-parameters must point to writable memory.
        unsafe { out.write(value) };
    }
}
