//! Recording handler and its shared log

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::event::Event;
use crate::handler::ObservationHandler;

/// Which handler callback fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerEventKind {
    /// `on_start`
    Start,
    /// `on_error`
    Error,
    /// `on_event`
    Event,
    /// `on_scope_opened`
    ScopeOpened,
    /// `on_scope_closed`
    ScopeClosed,
    /// `on_stop`
    Stop,
}

impl fmt::Display for HandlerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Start => "start",
            Self::Error => "error",
            Self::Event => "event",
            Self::ScopeOpened => "scope_opened",
            Self::ScopeClosed => "scope_closed",
            Self::Stop => "stop",
        };
        f.write_str(label)
    }
}

/// One callback as seen by a [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCallback {
    /// Label of the handler that received the callback
    pub label: String,
    /// Callback that fired
    pub kind: HandlerEventKind,
    /// Observation name at the time of the callback
    pub observation: String,
    /// Event name for `Event`, error kind for `Error`
    pub detail: Option<String>,
}

/// Shared, append-only log of recorded callbacks
///
/// Cloning shares the same log, so several handlers can write into one
/// sequence and the test can read the global dispatch order back.
#[derive(Debug, Clone, Default)]
pub struct HandlerLog {
    entries: Arc<Mutex<Vec<RecordedCallback>>>,
}

impl HandlerLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one callback
    pub fn record(&self, callback: RecordedCallback) {
        self.entries.lock().push(callback);
    }

    /// Snapshot of every recorded callback, in arrival order
    pub fn entries(&self) -> Vec<RecordedCallback> {
        self.entries.lock().clone()
    }

    /// Handler labels that received `kind`, in arrival order
    pub fn labels_for(&self, kind: HandlerEventKind) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.label.clone())
            .collect()
    }

    /// Callback kinds received by the handler labelled `label`
    pub fn kinds_for(&self, label: &str) -> Vec<HandlerEventKind> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.label == label)
            .map(|entry| entry.kind)
            .collect()
    }

    /// Number of recorded callbacks
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

type SupportPredicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Handler that records each callback into a [`HandlerLog`]
///
/// Supports every context unless narrowed with [`RecordingHandler::supporting`].
///
/// ```
/// use observa_core::testing::{HandlerEventKind, HandlerLog, RecordingHandler};
/// use observa_core::{Context, ObservationHandler};
///
/// let log = HandlerLog::new();
/// let handler = RecordingHandler::new("metrics", &log);
///
/// let mut context = Context::new();
/// handler.on_start(&mut context);
/// handler.on_stop(&context);
///
/// assert_eq!(log.kinds_for("metrics"), vec![HandlerEventKind::Start, HandlerEventKind::Stop]);
/// ```
#[derive(Clone)]
pub struct RecordingHandler {
    label: String,
    log: HandlerLog,
    supports: SupportPredicate,
}

impl RecordingHandler {
    /// Handler labelled `label`, writing into `log` and supporting every context
    pub fn new(label: impl Into<String>, log: &HandlerLog) -> Self {
        Self { label: label.into(), log: log.clone(), supports: Arc::new(|_| true) }
    }

    /// Narrow the contexts this handler accepts
    #[must_use]
    pub fn supporting<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.supports = Arc::new(predicate);
        self
    }

    /// Label written into every recorded callback
    pub fn label(&self) -> &str {
        &self.label
    }

    fn record(&self, kind: HandlerEventKind, context: &Context, detail: Option<String>) {
        self.log.record(RecordedCallback {
            label: self.label.clone(),
            kind,
            observation: context.name().to_string(),
            detail,
        });
    }
}

impl fmt::Debug for RecordingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandler").field("label", &self.label).finish_non_exhaustive()
    }
}

impl ObservationHandler for RecordingHandler {
    fn supports_context(&self, context: &Context) -> bool {
        (self.supports)(context)
    }

    fn on_start(&self, context: &mut Context) {
        self.record(HandlerEventKind::Start, context, None);
    }

    fn on_error(&self, context: &mut Context) {
        let kind = context.error().map(|error| error.kind().to_string());
        self.record(HandlerEventKind::Error, context, kind);
    }

    fn on_event(&self, event: &Event, context: &mut Context) {
        self.record(HandlerEventKind::Event, context, Some(event.name().to_string()));
    }

    fn on_scope_opened(&self, context: &mut Context) {
        self.record(HandlerEventKind::ScopeOpened, context, None);
    }

    fn on_scope_closed(&self, context: &mut Context) {
        self.record(HandlerEventKind::ScopeClosed, context, None);
    }

    fn on_stop(&self, context: &Context) {
        self.record(HandlerEventKind::Stop, context, None);
    }
}
