//! C ABI for the RTM wavefield replay engine
//!
//! A C or Fortran kernel drives one engine per shot:
//!
//! ```c
//! rtm_replay_reset_grid(engine, Forward, NULL);
//! for (size_t t = 0; t <= nt; ++t) {
//!     RtmStepPointers p;
//!     rtm_replay_save_forward(engine, t, &p);
//!     stencil(p.next, p.current, p.previous, p.frame_len);
//! }
//! rtm_replay_reset_grid(engine, Backward, NULL);
//! for (size_t t = nt + 1; t-- > 0;) {
//!     rtm_replay_fetch_forward(engine, t, NULL);
//!     rtm_replay_forward_grid(engine, forward, frame_len);
//! }
//! ```
//!
//! Every function returns an `RtmReplayErrorCode`; details of the last
//! failure on the calling thread are available from `rtm_replay_get_last_error`.

mod error;
mod helpers;
mod instance;
mod replay;

pub use error::{rtm_replay_get_last_error, rtm_replay_get_last_error_code, RtmReplayErrorCode};
pub use instance::{
    rtm_replay_config_default, rtm_replay_destroy, rtm_replay_new, RtmReplayConfig,
    RtmReplayInstance,
};
pub use replay::{
    rtm_replay_fetch_forward, rtm_replay_forward_grid, rtm_replay_host_frames,
    rtm_replay_is_host_memory_sufficient, rtm_replay_reset_grid, rtm_replay_save_forward,
    RtmPhase, RtmStepPointers,
};
