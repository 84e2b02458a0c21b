//! One `tracing` span per observation
//!
//! The span is opened in `on_start`, stored in the observation's context as
//! an [`ObservationSpan`] and closed in `on_stop`. A child observation's span
//! is parented to the span of its parent observation when that parent was
//! traced too; otherwise it nests under whatever span is entered.

use observa_core::{Context, Event, ObservationHandler};
use parking_lot::Mutex;
use tracing::field::{display, Empty};
use tracing::span::Id;
use tracing::{info, info_span, Span};

/// Span of a traced observation
#[derive(Debug, Default)]
pub struct ObservationSpan {
    span: Mutex<Option<Span>>,
}

impl ObservationSpan {
    fn new(span: Span) -> Self {
        Self { span: Mutex::new(Some(span)) }
    }

    /// Handle to the span while the observation is running
    pub fn span(&self) -> Option<Span> {
        self.span.lock().clone()
    }

    /// Id of the span, while it is open
    pub fn id(&self) -> Option<Id> {
        self.span.lock().as_ref().and_then(Span::id)
    }

    fn close(&self) -> Option<Span> {
        self.span.lock().take()
    }
}

/// Traces observations as `tracing` spans
#[derive(Debug, Clone, Default)]
pub struct SpanHandler;

impl SpanHandler {
    /// Handler opening one span per observation
    pub fn new() -> Self {
        Self
    }

    fn parent_span(context: &Context) -> Option<Id> {
        let parent = context.parent_observation()?;
        parent.with_context(|parent| parent.get::<ObservationSpan>().and_then(ObservationSpan::id))
    }
}

impl ObservationHandler for SpanHandler {
    fn supports_context(&self, _context: &Context) -> bool {
        true
    }

    fn on_start(&self, context: &mut Context) {
        let span = match Self::parent_span(context) {
            Some(parent) => info_span!(
                parent: parent,
                "observation",
                observation = %context.name(),
                contextual_name = Empty,
                error = Empty,
                tags = Empty
            ),
            None => info_span!(
                "observation",
                observation = %context.name(),
                contextual_name = Empty,
                error = Empty,
                tags = Empty
            ),
        };
        if let Some(contextual_name) = context.contextual_name() {
            span.record("contextual_name", contextual_name);
        }
        context.put(ObservationSpan::new(span));
    }

    fn on_error(&self, context: &mut Context) {
        let span = context.get::<ObservationSpan>().and_then(ObservationSpan::span);
        if let (Some(span), Some(error)) = (span, context.error()) {
            span.record("error", display(error));
        }
    }

    fn on_event(&self, event: &Event, context: &mut Context) {
        if let Some(span) = context.get::<ObservationSpan>().and_then(ObservationSpan::span) {
            info!(
                parent: &span,
                event = %event.name(),
                contextual_name = %event.contextual_name(),
                "observation event"
            );
        }
    }

    fn on_stop(&self, context: &Context) {
        if let Some(span) = context.get::<ObservationSpan>().and_then(ObservationSpan::close) {
            span.record("tags", display(context.low_cardinality_key_values()));
            // Dropping the last handle closes the span.
            drop(span);
        }
    }
}
