//! Testing utilities for code instrumented with observations
//!
//! Enabled by the `test-utils` feature. Provides:
//!
//! - **[`recording`]**: a handler that writes every callback into a shared
//!   [`HandlerLog`]
//! - **[`assertions`]**: checks over that log and over usage errors

pub mod assertions;
pub mod recording;

pub use assertions::{assert_callback_sequence, assert_never_notified, assert_notified_in_order};
pub use recording::{HandlerEventKind, HandlerLog, RecordedCallback, RecordingHandler};
