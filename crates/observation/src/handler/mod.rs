//! Handler contract and capability-filtered dispatch
//!
//! Handlers are the backends of the kernel: a metrics recorder, a span
//! exporter, a logger. Each one declares which contexts it understands via
//! [`ObservationHandler::supports_context`]; the kernel asks once per
//! observation, at start, and only the handlers that answered `true` see any
//! of that observation's callbacks.
//!
//! # Dispatch Rules
//! - Registration order is dispatch order, for every callback
//! - `on_stop` runs in the same order as `on_start` (not reversed)
//! - A panicking handler aborts the remaining dispatch for that callback;
//!   wrap it in [`IsolatingHandler`] to contain it
//!
//! Composition helpers live in submodules:
//! - **[`composite`]**: first-matching and all-matching groups
//! - **[`isolating`]**: panic containment wrapper

pub mod composite;
pub mod isolating;

use std::fmt::Debug;
use std::sync::Arc;

use tracing::trace;

pub use composite::{AllMatchingCompositeHandler, FirstMatchingCompositeHandler};
pub use isolating::IsolatingHandler;

use crate::context::Context;
use crate::event::Event;

/// Listener notified of an observation's lifecycle transitions
///
/// Only `supports_context` is required. Callbacks receive the observation's
/// context; they may stash per-observation state in it (a start instant, a
/// span handle) and read it back later. `on_stop` receives a shared
/// reference because a stopped context is read-only.
pub trait ObservationHandler: Send + Sync + Debug {
    /// Whether this handler wants callbacks for an observation with `context`
    fn supports_context(&self, context: &Context) -> bool;

    /// The observation started
    fn on_start(&self, _context: &mut Context) {}

    /// The instrumented operation failed; the error is already in the context
    fn on_error(&self, _context: &mut Context) {}

    /// An [`Event`] was signalled on the running observation
    fn on_event(&self, _event: &Event, _context: &mut Context) {}

    /// A scope was opened for the observation on the current thread
    fn on_scope_opened(&self, _context: &mut Context) {}

    /// A scope of the observation was closed
    fn on_scope_closed(&self, _context: &mut Context) {}

    /// Terminal callback
    fn on_stop(&self, _context: &Context) {}
}

impl<H: ObservationHandler + ?Sized> ObservationHandler for Arc<H> {
    fn supports_context(&self, context: &Context) -> bool {
        (**self).supports_context(context)
    }

    fn on_start(&self, context: &mut Context) {
        (**self).on_start(context);
    }

    fn on_error(&self, context: &mut Context) {
        (**self).on_error(context);
    }

    fn on_event(&self, event: &Event, context: &mut Context) {
        (**self).on_event(event, context);
    }

    fn on_scope_opened(&self, context: &mut Context) {
        (**self).on_scope_opened(context);
    }

    fn on_scope_closed(&self, context: &mut Context) {
        (**self).on_scope_closed(context);
    }

    fn on_stop(&self, context: &Context) {
        (**self).on_stop(context);
    }
}

/// Shared, type-erased handler as stored by the registry
pub type SharedHandler = Arc<dyn ObservationHandler>;

/// Handlers resolved for one observation, in registration order
///
/// Built once by [`HandlerChain::resolve`]; never re-filtered afterwards.
#[derive(Debug, Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<SharedHandler>,
}

impl HandlerChain {
    /// Keep the registered handlers that support `context`, preserving order
    pub fn resolve(registered: &[SharedHandler], context: &Context) -> Self {
        let handlers = registered
            .iter()
            .filter(|handler| handler.supports_context(context))
            .cloned()
            .collect();
        Self { handlers }
    }

    /// Number of resolved handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no registered handler supports the context
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolved handlers in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &SharedHandler> + '_ {
        self.handlers.iter()
    }

    /// Notify `on_start` in registration order
    pub fn on_start(&self, context: &mut Context) {
        for handler in &self.handlers {
            trace!(observation = %context.name(), ?handler, "dispatch on_start");
            handler.on_start(context);
        }
    }

    /// Notify `on_error` in registration order
    pub fn on_error(&self, context: &mut Context) {
        for handler in &self.handlers {
            trace!(observation = %context.name(), ?handler, "dispatch on_error");
            handler.on_error(context);
        }
    }

    /// Notify `on_event` in registration order
    pub fn on_event(&self, event: &Event, context: &mut Context) {
        for handler in &self.handlers {
            trace!(
                observation = %context.name(),
                event = %event.name(),
                ?handler,
                "dispatch on_event"
            );
            handler.on_event(event, context);
        }
    }

    /// Notify `on_scope_opened` in registration order
    pub fn on_scope_opened(&self, context: &mut Context) {
        for handler in &self.handlers {
            handler.on_scope_opened(context);
        }
    }

    /// Notify `on_scope_closed` in registration order
    pub fn on_scope_closed(&self, context: &mut Context) {
        for handler in &self.handlers {
            handler.on_scope_closed(context);
        }
    }

    /// Notify `on_stop` in registration order
    pub fn on_stop(&self, context: &Context) {
        for handler in &self.handlers {
            trace!(observation = %context.name(), ?handler, "dispatch on_stop");
            handler.on_stop(context);
        }
    }
}
