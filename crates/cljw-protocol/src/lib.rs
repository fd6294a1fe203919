//! cljw Protocol Types
//!
//! Defines the newline-delimited JSON messages exchanged between the build
//! tool and the worker, and between the worker and the guest hosts that back
//! its execution environments.

pub mod compile;
pub mod error;
pub mod framing;
pub mod guest;
pub mod request;
pub mod response;

pub use compile::CompileRequest;
pub use error::{ErrorCode, WorkError};
pub use framing::{read_message, write_message, FrameError};
pub use guest::{GuestCommand, GuestReply, Signal};
pub use request::{Input, WorkRequest};
pub use response::WorkResponse;

/// Default upper bound for a single framed message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Exit code reported for a successful request.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code reported for a failed request.
pub const EXIT_FAILURE: i32 = 1;
