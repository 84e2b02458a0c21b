//! The per-operation state machine
//!
//! An [`Observation`] is a cheap, clonable handle. Every clone drives the same
//! lifecycle:
//!
//! ```text
//! Created ──start()──▶ Started ──error()──▶ Errored
//!                         │                    │
//!                         └──────stop()────────┴──▶ Stopped
//! ```
//!
//! # Design
//! - Handlers and tag providers are resolved once, by the `start()`
//!   transition, against the context as it is at that moment
//! - Each transition notifies the resolved handlers in registration order
//! - Illegal transitions fail with an [`ObservationError`] and notify nobody
//! - A no-op observation (disabled registry, rejecting predicate, no
//!   handlers registered) keeps no state: every call succeeds silently
//!
//! The lifecycle and context sit behind a mutex held for the duration of a
//! dispatch. A handler must not call back into the observation it is being
//! notified about.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{self, Poll};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::{CapturedError, Context, ObservedError};
use crate::error::{ObservationError, ObservationResult};
use crate::event::Event;
use crate::handler::HandlerChain;
use crate::key_value::KeyValue;
use crate::registry::{ObservationRegistry, SharedFilter};
use crate::scope::{CurrentGuard, ObservationScope};
use crate::tags::{SharedTagsProvider, TagsProvider, TagsProviderChain};

/// Lifecycle state of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Created, not started yet
    Created,
    /// Running
    Started,
    /// Running, with the operation's error recorded
    Errored,
    /// Terminal
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Created => write!(f, "created"),
            Lifecycle::Started => write!(f, "started"),
            Lifecycle::Errored => write!(f, "errored"),
            Lifecycle::Stopped => write!(f, "stopped"),
        }
    }
}

struct ObservationCore {
    context: Context,
    lifecycle: Lifecycle,
    handlers: HandlerChain,
    tags_provider: Option<SharedTagsProvider>,
    tags: TagsProviderChain,
    filters: Vec<SharedFilter>,
}

impl ObservationCore {
    fn rejected(&self, usage: fn(String) -> ObservationError) -> ObservationError {
        let error = usage(self.context.name().to_string());
        warn!(
            observation = %self.context.name(),
            lifecycle = %self.lifecycle,
            %error,
            "rejected observation transition"
        );
        error
    }

    fn transition(&mut self, next: Lifecycle) {
        debug!(
            observation = %self.context.name(),
            from = %self.lifecycle,
            to = %next,
            handlers = self.handlers.len(),
            "observation transition"
        );
        self.lifecycle = next;
    }

    fn start(&mut self, registry: &ObservationRegistry) -> ObservationResult<()> {
        match self.lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Stopped => {
                return Err(self.rejected(|name| ObservationError::AlreadyStopped { name }))
            }
            Lifecycle::Started | Lifecycle::Errored => {
                return Err(self.rejected(|name| ObservationError::AlreadyStarted { name }))
            }
        }

        let snapshot = registry.snapshot();
        self.tags = TagsProviderChain::resolve(
            &snapshot.tags_providers,
            self.tags_provider.as_ref(),
            &self.context,
        );
        self.tags.apply(&mut self.context);
        self.handlers = HandlerChain::resolve(&snapshot.handlers, &self.context);
        self.filters = snapshot.filters.clone();

        self.transition(Lifecycle::Started);
        self.handlers.on_start(&mut self.context);
        Ok(())
    }

    fn error(&mut self, error: CapturedError) -> ObservationResult<()> {
        match self.lifecycle {
            Lifecycle::Started => {}
            Lifecycle::Created => {
                return Err(self.rejected(|name| ObservationError::NotStarted { name }))
            }
            Lifecycle::Errored => {
                return Err(self.rejected(|name| ObservationError::AlreadyErrored { name }))
            }
            Lifecycle::Stopped => {
                return Err(self.rejected(|name| ObservationError::AlreadyStopped { name }))
            }
        }

        self.context.record_error(error);
        self.transition(Lifecycle::Errored);
        self.handlers.on_error(&mut self.context);
        Ok(())
    }

    fn event(&mut self, event: &Event) -> ObservationResult<()> {
        match self.lifecycle {
            Lifecycle::Started | Lifecycle::Errored => {}
            Lifecycle::Created => {
                return Err(self.rejected(|name| ObservationError::NotStarted { name }))
            }
            Lifecycle::Stopped => {
                return Err(self.rejected(|name| ObservationError::AlreadyStopped { name }))
            }
        }

        self.handlers.on_event(event, &mut self.context);
        Ok(())
    }

    fn stop(&mut self) -> ObservationResult<()> {
        match self.lifecycle {
            Lifecycle::Started | Lifecycle::Errored => {}
            Lifecycle::Created => {
                return Err(self.rejected(|name| ObservationError::NotStarted { name }))
            }
            Lifecycle::Stopped => {
                return Err(self.rejected(|name| ObservationError::AlreadyStopped { name }))
            }
        }

        self.tags.apply(&mut self.context);
        for filter in &self.filters {
            filter.map(&mut self.context);
        }
        self.transition(Lifecycle::Stopped);
        self.handlers.on_stop(&self.context);
        Ok(())
    }

    fn mutate<R>(&mut self, f: impl FnOnce(&mut Context) -> R) -> ObservationResult<R> {
        if self.lifecycle == Lifecycle::Stopped {
            return Err(self.rejected(|name| ObservationError::AlreadyStopped { name }));
        }
        Ok(f(&mut self.context))
    }
}

struct ObservationInner {
    registry: ObservationRegistry,
    core: Mutex<ObservationCore>,
}

/// Handle to one observed operation
///
/// Equality is identity: two handles are equal when they drive the same
/// observation (all no-op handles are equal to each other).
#[derive(Clone)]
pub struct Observation {
    inner: Option<Arc<ObservationInner>>,
}

impl Observation {
    /// Observation that notifies nobody and keeps no state
    pub const fn noop() -> Self {
        Self { inner: None }
    }

    /// Create an observation named `name`; it still has to be started
    ///
    /// The result is a no-op when the registry is disabled, has no handlers,
    /// or a predicate rejects the name. Handlers are matched against the
    /// context later, at `start()`: an observation whose context no handler
    /// supports is still a real observation. It tracks its lifecycle and
    /// reports usage errors, but notifies nobody.
    pub fn create(name: impl Into<String>, registry: &ObservationRegistry) -> Self {
        registry.observation(name)
    }

    /// Create an observation over a caller-built (possibly shaped) context
    pub fn create_with_context(
        name: impl Into<String>,
        context: Context,
        registry: &ObservationRegistry,
    ) -> Self {
        registry.observation_with_context(name, context)
    }

    /// Create and start in one step
    pub fn start_new(
        name: impl Into<String>,
        registry: &ObservationRegistry,
    ) -> ObservationResult<Self> {
        let observation = Self::create(name, registry);
        observation.start()?;
        Ok(observation)
    }

    pub(crate) fn from_parts(registry: ObservationRegistry, context: Context) -> Self {
        let core = ObservationCore {
            context,
            lifecycle: Lifecycle::Created,
            handlers: HandlerChain::default(),
            tags_provider: None,
            tags: TagsProviderChain::default(),
            filters: Vec::new(),
        };
        Self { inner: Some(Arc::new(ObservationInner { registry, core: Mutex::new(core) })) }
    }

    pub(crate) fn registry_id(&self) -> Option<u64> {
        self.inner.as_ref().map(|inner| inner.registry.id())
    }

    /// Whether this handle notifies nobody and keeps no state
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Current observation name; empty for a no-op observation
    pub fn name(&self) -> String {
        self.with_context(|context| context.name().to_string())
    }

    /// Current lifecycle state; a no-op observation always reports `Created`
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.as_ref().map_or(Lifecycle::Created, |inner| inner.core.lock().lifecycle)
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Set the human-readable name
    pub fn contextual_name(&self, contextual_name: impl Into<String>) -> &Self {
        let contextual_name = contextual_name.into();
        self.configure(|context| context.set_contextual_name(contextual_name));
        self
    }

    /// Add a tag safe to use as a metric label
    pub fn low_cardinality_key_value(&self, key_value: impl Into<KeyValue>) -> &Self {
        let key_value = key_value.into();
        self.configure(|context| context.add_low_cardinality_key_value(key_value));
        self
    }

    /// Add a tag with unbounded values, for traces and logs only
    pub fn high_cardinality_key_value(&self, key_value: impl Into<KeyValue>) -> &Self {
        let key_value = key_value.into();
        self.configure(|context| context.add_high_cardinality_key_value(key_value));
        self
    }

    /// Provider applied after the registry's global providers
    ///
    /// Only takes effect when set before `start()`.
    pub fn tags_provider<P: TagsProvider + 'static>(&self, provider: P) -> &Self {
        if let Some(inner) = &self.inner {
            let mut core = inner.core.lock();
            if core.lifecycle == Lifecycle::Created {
                core.tags_provider = Some(Arc::new(provider));
            } else {
                warn!(
                    observation = %core.context.name(),
                    lifecycle = %core.lifecycle,
                    "tags provider set after start is ignored"
                );
            }
        }
        self
    }

    /// Override the parent picked up from the current scope at creation
    ///
    /// Only takes effect when set before `start()`.
    pub fn parent_observation(&self, parent: &Observation) -> &Self {
        if let (Some(inner), false) = (&self.inner, parent.is_noop()) {
            let mut core = inner.core.lock();
            if core.lifecycle == Lifecycle::Created {
                core.context.set_parent_observation(parent.clone());
            } else {
                warn!(
                    observation = %core.context.name(),
                    lifecycle = %core.lifecycle,
                    "parent set after start is ignored"
                );
            }
        }
        self
    }

    fn configure(&self, f: impl FnOnce(&mut Context)) {
        if let Some(inner) = &self.inner {
            // Already logged; configuration setters stay fluent.
            let _ = inner.core.lock().mutate(f);
        }
    }

    // ------------------------------------------------------------------
    // Context access
    // ------------------------------------------------------------------

    /// Read the context
    pub fn with_context<R>(&self, f: impl FnOnce(&Context) -> R) -> R {
        match &self.inner {
            Some(inner) => f(&inner.core.lock().context),
            None => f(&Context::default()),
        }
    }

    /// Mutate the context; fails once the observation is stopped
    pub fn with_context_mut<R>(&self, f: impl FnOnce(&mut Context) -> R) -> ObservationResult<R> {
        match &self.inner {
            Some(inner) => inner.core.lock().mutate(f),
            None => Ok(f(&mut Context::default())),
        }
    }

    /// Store a typed value in the context
    pub fn put<T: std::any::Any + Send + Sync>(&self, value: T) -> ObservationResult<&Self> {
        self.with_context_mut(|context| {
            context.put(value);
        })?;
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Resolve handlers and tag providers, then notify `on_start`
    pub fn start(&self) -> ObservationResult<&Self> {
        if let Some(inner) = &self.inner {
            inner.core.lock().start(&inner.registry)?;
        }
        Ok(self)
    }

    /// Record the operation's error and notify `on_error`
    ///
    /// Accepts any [`Error`](std::error::Error) as well as boxed trait-object
    /// errors. Only the first error is kept: a second call fails with
    /// [`ObservationError::AlreadyErrored`] and notifies nobody.
    pub fn error<K, E>(&self, error: &E) -> ObservationResult<&Self>
    where
        E: ObservedError<K> + ?Sized,
    {
        if let Some(inner) = &self.inner {
            let captured = error.to_captured();
            inner.core.lock().error(captured)?;
        }
        Ok(self)
    }

    /// Signal an event on the running observation
    pub fn event(&self, event: Event) -> ObservationResult<&Self> {
        if let Some(inner) = &self.inner {
            inner.core.lock().event(&event)?;
        }
        Ok(self)
    }

    /// Terminal transition: apply tags and filters, then notify `on_stop`
    pub fn stop(&self) -> ObservationResult<()> {
        if let Some(inner) = &self.inner {
            inner.core.lock().stop()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Make this observation current on this thread until the scope closes
    pub fn open_scope(&self) -> ObservationScope {
        ObservationScope::open(self.clone())
    }

    /// Run `work` inside a scope of this observation
    ///
    /// If `work` fails its error is recorded with [`Observation::error`]
    /// before the scope closes, and returned unchanged. Lifecycle misuse is
    /// logged rather than returned, so wrapping never changes the outcome of
    /// `work`.
    pub fn scoped<T, E, K, F>(&self, work: F) -> Result<T, E>
    where
        E: ObservedError<K>,
        F: FnOnce() -> Result<T, E>,
    {
        let scope = self.open_scope();
        let result = work();
        if let Err(error) = &result {
            // Already logged; the operation's own error takes precedence.
            let _ = self.error(error);
        }
        scope.close();
        result
    }

    /// `start()`, [`scoped`](Observation::scoped), then `stop()`
    pub fn observe<T, E, K, F>(&self, work: F) -> Result<T, E>
    where
        E: ObservedError<K>,
        F: FnOnce() -> Result<T, E>,
    {
        let _ = self.start();
        let result = self.scoped(work);
        let _ = self.stop();
        result
    }

    /// Keep this observation current while `future` is polled
    ///
    /// No scope callbacks fire; the future may move between threads.
    pub fn instrument<F: Future>(&self, future: F) -> Instrumented<F> {
        Instrumented { observation: self.clone(), future: Box::pin(future) }
    }

    pub(crate) fn notify_scope_opened(&self) {
        if let Some(inner) = &self.inner {
            let mut guard = inner.core.lock();
            let core = &mut *guard;
            if core.lifecycle != Lifecycle::Stopped {
                core.handlers.on_scope_opened(&mut core.context);
            }
        }
    }

    pub(crate) fn notify_scope_closed(&self) {
        if let Some(inner) = &self.inner {
            let mut guard = inner.core.lock();
            let core = &mut *guard;
            if core.lifecycle != Lifecycle::Stopped {
                core.handlers.on_scope_closed(&mut core.context);
            }
        }
    }
}

impl Default for Observation {
    fn default() -> Self {
        Self::noop()
    }
}

impl PartialEq for Observation {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for Observation {}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(inner) = &self.inner else {
            return f.write_str("Observation(noop)");
        };
        // A handler may format the context while the observation is locked.
        match inner.core.try_lock() {
            Some(core) => f
                .debug_struct("Observation")
                .field("name", &core.context.name())
                .field("lifecycle", &core.lifecycle)
                .field("handlers", &core.handlers.len())
                .finish(),
            None => f.write_str("Observation(<dispatching>)"),
        }
    }
}

/// Future that keeps an observation current while polled
///
/// Returned by [`Observation::instrument`].
#[must_use = "futures do nothing unless polled"]
pub struct Instrumented<F> {
    observation: Observation,
    future: Pin<Box<F>>,
}

impl<F> Instrumented<F> {
    /// Observation kept current while the future is polled
    pub fn observation(&self) -> &Observation {
        &self.observation
    }
}

impl<F: Future> Future for Instrumented<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _current = CurrentGuard::install(
            this.observation.registry_id(),
            Some(this.observation.clone()),
        );
        this.future.as_mut().poll(cx)
    }
}

impl<F> fmt::Debug for Instrumented<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented").field("observation", &self.observation).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::fmt;

    use super::*;
    use crate::testing::{HandlerEventKind, HandlerLog, RecordingHandler};

    #[derive(Debug)]
    struct Declined;

    impl fmt::Display for Declined {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "card declined")
        }
    }

    impl Error for Declined {}

    fn recording_registry() -> (ObservationRegistry, HandlerLog) {
        let log = HandlerLog::new();
        let registry = ObservationRegistry::new();
        registry.register_handler(Arc::new(RecordingHandler::new("recorder", &log)));
        (registry, log)
    }

    #[test]
    fn lifecycle_follows_transitions() {
        let (registry, _log) = recording_registry();
        let observation = Observation::create("payment", &registry);
        assert_eq!(observation.lifecycle(), Lifecycle::Created);

        observation.start().expect("start");
        assert_eq!(observation.lifecycle(), Lifecycle::Started);

        observation.error(&Declined).expect("first error");
        assert_eq!(observation.lifecycle(), Lifecycle::Errored);

        observation.stop().expect("stop");
        assert_eq!(observation.lifecycle(), Lifecycle::Stopped);
    }

    #[test]
    fn transitions_before_start_are_rejected() {
        let (registry, log) = recording_registry();
        let observation = Observation::create("payment", &registry);

        assert!(matches!(observation.stop(), Err(ObservationError::NotStarted { .. })));
        assert!(matches!(
            observation.event(Event::of("retry")),
            Err(ObservationError::NotStarted { .. })
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn start_twice_is_rejected() {
        let (registry, log) = recording_registry();
        let observation = Observation::start_new("payment", &registry).expect("start");

        let second = observation.start();
        assert!(matches!(second, Err(ObservationError::AlreadyStarted { .. })));
        assert_eq!(log.labels_for(HandlerEventKind::Start).len(), 1);
    }

    #[test]
    fn context_is_read_only_after_stop() {
        let (registry, _log) = recording_registry();
        let observation = Observation::start_new("payment", &registry).expect("start");
        observation.stop().expect("stop");

        let result = observation.with_context_mut(|context| context.set_name("renamed"));
        assert!(matches!(result, Err(ObservationError::AlreadyStopped { .. })));

        observation.low_cardinality_key_value(("late", "tag"));
        assert_eq!(observation.name(), "payment");
        assert!(observation.with_context(|c| c.low_cardinality_key_values().is_empty()));
    }

    #[test]
    fn noop_observation_accepts_everything() {
        let observation = Observation::noop();
        observation.start().expect("noop start");
        observation.stop().expect("noop stop");
        observation.stop().expect("noop keeps no state");
        assert!(observation.is_noop());
        assert_eq!(observation.name(), "");
    }

    #[test]
    fn clones_share_one_lifecycle() {
        let (registry, _log) = recording_registry();
        let observation = Observation::create("payment", &registry);
        let clone = observation.clone();

        clone.start().expect("start through clone");
        assert_eq!(observation.lifecycle(), Lifecycle::Started);
        assert_eq!(observation, clone);
        assert_ne!(observation, Observation::create("payment", &registry));
    }

    #[test]
    fn event_reaches_handlers_between_start_and_stop() {
        let (registry, log) = recording_registry();
        let observation = Observation::start_new("payment", &registry).expect("start");
        observation.event(Event::of("retry")).expect("event");
        observation.stop().expect("stop");

        assert_eq!(
            log.kinds_for("recorder"),
            vec![HandlerEventKind::Start, HandlerEventKind::Event, HandlerEventKind::Stop]
        );
        assert_eq!(log.entries()[1].detail.as_deref(), Some("retry"));
    }

    #[test]
    fn scoped_records_boxed_error_and_returns_it() {
        let (registry, log) = recording_registry();
        let observation = Observation::start_new("backup", &registry).expect("start");

        let result: Result<(), Box<dyn Error + Send + Sync>> =
            observation.scoped(|| Err("disk full".into()));

        assert_eq!(result.expect_err("work failed").to_string(), "disk full");
        let message = observation.with_context(|c| c.error().map(|e| e.message().to_owned()));
        assert_eq!(message.as_deref(), Some("disk full"));
        assert_eq!(log.entries()[2].kind, HandlerEventKind::Error);
        assert_eq!(log.entries()[2].detail.as_deref(), Some("Error"));
    }


    #[test]
    fn unsupported_context_still_tracks_lifecycle() {
        let log = HandlerLog::new();
        let registry = ObservationRegistry::new();
        let picky = RecordingHandler::new("picky", &log).supporting(|_| false);
        registry.register_handler(Arc::new(picky));

        let observation = Observation::create("export", &registry);
        assert!(!observation.is_noop());
        assert!(matches!(observation.stop(), Err(ObservationError::NotStarted { .. })));

        observation.start().expect("start");
        observation.stop().expect("stop");
        assert_eq!(observation.lifecycle(), Lifecycle::Stopped);
        assert!(log.is_empty());
    }

}
