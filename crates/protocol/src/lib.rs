//! Wire protocol shared by every hop of the harbor pipeline.
//!
//! Two envelopes travel here:
//! - the in-page transport envelope (`page` module) — page ↔ content script ↔
//!   background, one JSON object per message on the `web_agents_api` channel;
//! - the native-messaging envelope (`native` module) — background ↔ helper,
//!   length-prefixed JSON frames (`framing` module).
//!
//! Error codes and permission scopes are closed sets; both sides of the wire
//! name them by their exact spellings, so they live here rather than in the
//! broker.

pub mod error_codes;
pub mod framing;
pub mod native;
pub mod page;
pub mod scopes;

pub use {
    error_codes::ErrorShape,
    framing::{FrameError, MAX_FRAME_BYTES, read_frame, write_frame},
    native::{NativeErrorFrame, NativeEvent, NativeRequest, NativeResponse},
    page::{PAGE_CHANNEL, PageAbort, PageFrame, PageMessage, PageRequest, PageResponse,
        PageStreamEvent},
    scopes::{GrantState, Scope},
};

/// Default wall-clock budget for non-streaming requests.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
