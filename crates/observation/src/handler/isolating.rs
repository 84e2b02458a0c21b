//! Panic containment for a single handler
//!
//! The kernel does not shield one handler's failure from the next. Wrapping
//! a handler in [`IsolatingHandler`] turns a panic inside any of its
//! callbacks into an `error!` log line, so dispatch continues with the
//! following handlers.
//!
//! Requires `panic = "unwind"` in the active profile.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use super::ObservationHandler;
use crate::context::Context;
use crate::event::Event;

/// Wraps `H` and swallows panics raised by its callbacks
#[derive(Debug)]
pub struct IsolatingHandler<H> {
    inner: H,
}

impl<H: ObservationHandler> IsolatingHandler<H> {
    /// Wrap `inner`
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    /// Wrapped handler
    pub fn inner(&self) -> &H {
        &self.inner
    }

    fn guarded(&self, callback: &'static str, observation: &str, f: impl FnOnce()) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            error!(
                handler = ?self.inner,
                callback,
                observation,
                panic = panic_message(payload.as_ref()),
                "observation handler panicked; continuing dispatch"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl<H: ObservationHandler> ObservationHandler for IsolatingHandler<H> {
    fn supports_context(&self, context: &Context) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.inner.supports_context(context))).unwrap_or_else(
            |payload| {
                error!(
                    handler = ?self.inner,
                    observation = context.name(),
                    panic = panic_message(payload.as_ref()),
                    "observation handler panicked in supports_context; excluding it"
                );
                false
            },
        )
    }

    fn on_start(&self, context: &mut Context) {
        let name = context.name().to_string();
        self.guarded("on_start", &name, || self.inner.on_start(context));
    }

    fn on_error(&self, context: &mut Context) {
        let name = context.name().to_string();
        self.guarded("on_error", &name, || self.inner.on_error(context));
    }

    fn on_event(&self, event: &Event, context: &mut Context) {
        let name = context.name().to_string();
        self.guarded("on_event", &name, || self.inner.on_event(event, context));
    }

    fn on_scope_opened(&self, context: &mut Context) {
        let name = context.name().to_string();
        self.guarded("on_scope_opened", &name, || self.inner.on_scope_opened(context));
    }

    fn on_scope_closed(&self, context: &mut Context) {
        let name = context.name().to_string();
        self.guarded("on_scope_closed", &name, || self.inner.on_scope_closed(context));
    }

    fn on_stop(&self, context: &Context) {
        self.guarded("on_stop", context.name(), || self.inner.on_stop(context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Exploding;

    impl ObservationHandler for Exploding {
        fn supports_context(&self, _context: &Context) -> bool {
            true
        }

        fn on_start(&self, _context: &mut Context) {
            panic!("exporter offline");
        }
    }

    #[test]
    fn panic_in_wrapped_callback_is_contained() {
        let handler = IsolatingHandler::new(Exploding);
        let mut context = Context::new();
        handler.on_start(&mut context);
        handler.on_stop(&context);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
