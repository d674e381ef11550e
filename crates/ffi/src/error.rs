use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;

use rtm_replay_core::{ReplayError, Tier};

/// Common interface for errors crossing the FFI boundary.
///
/// - `code()` - Returns the error code passed across the FFI boundary
/// - `msg()` - Returns the error message for diagnostics
pub(crate) trait ReplayFfiError {
    /// Returns the error code to be returned across the FFI boundary.
    fn code(&self) -> RtmReplayErrorCode;

    /// Returns the human-readable error message.
    fn msg(&self) -> &str;
}

/// Default implementation of `ReplayFfiError`.
///
/// Wraps an `RtmReplayErrorCode` with a message. Engine failures convert
/// through `From<ReplayError>`, which maps each failing tier to its own code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DefaultReplayFfiError {
    code: RtmReplayErrorCode,
    msg: String,
}

impl DefaultReplayFfiError {
    /// Create error for null pointer passed where non-null required.
    ///
    /// # Arguments
    /// * `param_name` - The name of the parameter that was null (e.g., `"out_instance"`)
    pub fn null_pointer(param_name: &str) -> Self {
        Self {
            code: RtmReplayErrorCode::NullPointer,
            msg: format!("Parameter '{param_name}' cannot be null"),
        }
    }

    /// Create error for poisoned lock.
    ///
    /// # Arguments
    /// * `lock_name` - The name of the lock that was poisoned (e.g., `"Mutex"`)
    pub fn lock_poisoned(lock_name: &str) -> Self {
        Self {
            code: RtmReplayErrorCode::LockPoisoned,
            msg: format!("Lock '{lock_name}' was poisoned by a panic in another thread"),
        }
    }

    /// Create error for invalid parameter.
    ///
    /// # Arguments
    /// * `param_name` - The name of the invalid parameter (e.g., `"nx"`, `"out_len"`)
    /// * `message` - A description of the validation error
    pub fn invalid_parameter(param_name: &str, message: &str) -> Self {
        Self {
            code: RtmReplayErrorCode::InvalidParameter,
            msg: format!("Parameter {param_name}: {message}"),
        }
    }
}

impl From<ReplayError> for DefaultReplayFfiError {
    fn from(error: ReplayError) -> Self {
        let code = match error.tier() {
            Tier::Allocation => RtmReplayErrorCode::AllocationExhausted,
            Tier::Segment => RtmReplayErrorCode::SegmentIo,
            Tier::Codec => RtmReplayErrorCode::Codec,
            Tier::Device => RtmReplayErrorCode::Device,
            Tier::Cursor => RtmReplayErrorCode::Cursor,
            Tier::Config => RtmReplayErrorCode::InvalidParameter,
        };
        Self {
            code,
            msg: error.to_string(),
        }
    }
}

impl ReplayFfiError for DefaultReplayFfiError {
    fn code(&self) -> RtmReplayErrorCode {
        self.code
    }

    fn msg(&self) -> &str {
        &self.msg
    }
}

/// FFI error codes returned by replay functions.
/// Follows standard C convention: 0 = success, non-zero = error.
///
/// Every code other than `NullPointer`, `InvalidParameter` and `LockPoisoned`
/// is fatal for the current shot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtmReplayErrorCode {
    /// Operation completed successfully.
    Ok = 0,

    /// Invalid pointer: null pointer passed where non-null required.
    NullPointer = 1,

    /// Lock poisoned: internal synchronization primitive was poisoned by a panic.
    LockPoisoned = 2,

    /// Invalid parameter or rejected configuration.
    InvalidParameter = 3,

    /// Host staging buffer could not be allocated even at its minimum size.
    AllocationExhausted = 4,

    /// Segment file could not be created, written, or opened.
    SegmentIo = 5,

    /// Segment payload could not be encoded or decoded.
    Codec = 6,

    /// Transfer between the device ring and host memory failed.
    Device = 7,

    /// Time step out of order, sweep exhausted, or operation outside its sweep.
    Cursor = 8,
}

thread_local! {
    /// Thread-local storage for the most recent FFI error (C string, error code).
    /// The CString is kept here so the pointer handed out stays valid.
    static LAST_ERROR: RefCell<(Option<CString>, RtmReplayErrorCode)> = const { RefCell::new((None, RtmReplayErrorCode::Ok)) };
}

/// Internal helper to read `LAST_ERROR` thread-local storage (cstring, code).
pub(crate) fn with_last_error<F, R>(f: F) -> R
where
    F: FnOnce(&(Option<CString>, RtmReplayErrorCode)) -> R,
{
    LAST_ERROR.with_borrow(f)
}

/// Internal helper to mutate `LAST_ERROR` thread-local storage (cstring, code).
pub(crate) fn with_last_error_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut (Option<CString>, RtmReplayErrorCode)) -> R,
{
    LAST_ERROR.with_borrow_mut(f)
}

/// Retrieve the most recent FFI error message as a null-terminated C string.
///
/// Returns:
/// - A borrowed pointer to the error message if an error occurred.
/// - `null` if the last call on this thread succeeded.
///
/// # Thread Safety
/// Error messages are stored per-thread, so each thread sees only its own failures.
///
/// # Lifetime
/// The returned pointer is valid until the next FFI call on this thread.
///
/// **DO NOT FREE THIS POINTER** - it is managed internally.
///
/// Example:
/// ```cpp
/// RtmReplayErrorCode err = rtm_replay_fetch_forward(engine, t);
/// if (err != Ok) {
///     const char* error = rtm_replay_get_last_error();
///     if (error) {
///         fprintf(stderr, "replay failed: %s\n", error);
///     }
/// }
/// ```
#[no_mangle]
pub extern "C" fn rtm_replay_get_last_error() -> *const c_char {
    with_last_error(|(cstring, _code)| cstring.as_ref().map_or(ptr::null(), |cs| cs.as_ptr()))
}

/// Retrieve the most recent FFI error code.
///
/// Returns `RtmReplayErrorCode::Ok` (0) if the last call on this thread succeeded.
#[no_mangle]
pub extern "C" fn rtm_replay_get_last_error_code() -> RtmReplayErrorCode {
    with_last_error(|(_cstring, code)| *code)
}
