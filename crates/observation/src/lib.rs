//! Observation lifecycle kernel.
//!
//! Instrumented code marks the start and end of a logical operation once;
//! registered handlers (metrics, tracing, logging backends) react to that
//! lifecycle without the call site knowing which backends exist.
//!
//! # Building Blocks
//!
//! - **[`context`]**: type-keyed value store, error slot and tag sets
//! - **[`handler`]**: the handler contract and the capability-filtered chain
//! - **[`tags`]**: tag providers and their composition
//! - **[`scope`]**: per-thread "current observation" tracking
//! - **[`observation`]**: the per-operation state machine
//! - **[`registry`]**: configuration root and observation factory
//!
//! # Feature Tiers
//!
//! - `serde`: [`config`] loaders for TOML, JSON and environment variables
//! - `test-utils`: [`testing`] recording handler and assertions
//! - `anyhow`: `anyhow::Error` accepted wherever an operation error is recorded
//!
//! ```
//! use std::sync::Arc;
//!
//! use observa_core::{Context, Observation, ObservationHandler, ObservationRegistry};
//!
//! #[derive(Debug)]
//! struct Stdout;
//!
//! impl ObservationHandler for Stdout {
//!     fn supports_context(&self, _context: &Context) -> bool {
//!         true
//!     }
//! }
//!
//! let registry = ObservationRegistry::new();
//! registry.register_handler(Arc::new(Stdout));
//!
//! let observation = Observation::create("tax.calculate", &registry);
//! let total: Result<u32, std::num::ParseIntError> = observation.observe(|| "42".parse());
//! assert_eq!(total.ok(), Some(42));
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod key_value;
pub mod observation;
pub mod registry;
pub mod scope;
pub mod tags;

#[cfg(feature = "serde")]
pub mod config;

#[cfg(any(feature = "test-utils", test))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use context::{BoxedError, CapturedError, Context, ObservedError, TypedError};
pub use error::{ObservationError, ObservationResult};
pub use event::Event;
pub use handler::{
    AllMatchingCompositeHandler, FirstMatchingCompositeHandler, HandlerChain, IsolatingHandler,
    ObservationHandler, SharedHandler,
};
pub use key_value::{KeyValue, KeyValues};
pub use observation::{Instrumented, Lifecycle, Observation};
pub use registry::{ObservationFilter, ObservationPredicate, ObservationRegistry, SharedFilter};
pub use scope::{CurrentGuard, ObservationScope};
pub use tags::{CommonTagsProvider, SharedTagsProvider, TagsProvider, TagsProviderChain};
