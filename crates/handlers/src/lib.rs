//! Reference observation handlers.
//!
//! Each handler turns the lifecycle callbacks of `observa-core` into the
//! output of one backend:
//!
//! - **[`LoggingHandler`]**: one `tracing` event per callback
//! - **[`SpanHandler`]**: one `tracing` span per observation, nested under
//!   the parent observation's span
//! - **[`MetricsHandler`]**: timers, active gauges and event counters through
//!   the `metrics` facade
//!
//! None of them aggregate or export anything themselves; installing a
//! subscriber or a metrics recorder is up to the application.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod logging;
pub mod metrics;
pub mod span;

pub use crate::logging::{init_test_subscriber, LoggingHandler};
pub use crate::metrics::MetricsHandler;
pub use crate::span::{ObservationSpan, SpanHandler};
