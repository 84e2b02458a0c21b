//! Configuration root and observation factory
//!
//! A registry is configured once (handlers, global tag providers, predicates,
//! filters) and then shared read-only by every thread that creates
//! observations. Registration order is dispatch order.
//!
//! # Design
//! - Configuration is copy-on-write: registering swaps in a new snapshot, so
//!   an observation always works against one consistent view
//! - The factory hands out a no-op observation when the registry is
//!   disabled, no handler is registered, or any predicate rejects the
//!   observation
//! - Each registry owns its own per-thread current-observation slot

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::context::Context;
use crate::handler::SharedHandler;
use crate::observation::Observation;
use crate::scope::{self, CurrentGuard};
use crate::tags::SharedTagsProvider;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Registry-level veto over creating an observation, given its name and context
pub type ObservationPredicate = Arc<dyn Fn(&str, &Context) -> bool + Send + Sync>;

/// Last chance to adjust a context before `on_stop`
///
/// Filters run in registration order, after the tag providers were applied a
/// final time. Typical uses: dropping a sensitive tag, normalising a name.
pub trait ObservationFilter: Send + Sync + Debug {
    /// Adjust `context` in place
    fn map(&self, context: &mut Context);
}

/// Shared, type-erased filter
pub type SharedFilter = Arc<dyn ObservationFilter>;

/// One consistent view of the registry configuration
#[derive(Clone, Default)]
pub(crate) struct RegistrySnapshot {
    pub(crate) handlers: Vec<SharedHandler>,
    pub(crate) tags_providers: Vec<SharedTagsProvider>,
    pub(crate) predicates: Vec<ObservationPredicate>,
    pub(crate) filters: Vec<SharedFilter>,
}

impl Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("handlers", &self.handlers)
            .field("tags_providers", &self.tags_providers)
            .field("predicates", &self.predicates.len())
            .field("filters", &self.filters)
            .finish()
    }
}

#[derive(Debug)]
struct RegistryInner {
    id: u64,
    enabled: AtomicBool,
    config: RwLock<Arc<RegistrySnapshot>>,
}

/// Process-wide configuration root; cheap to clone
#[derive(Debug, Clone)]
pub struct ObservationRegistry {
    inner: Arc<RegistryInner>,
}

impl ObservationRegistry {
    /// Enabled registry with nothing registered
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Disabled registry: every observation it creates is a no-op
    pub fn noop() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
                enabled: AtomicBool::new(enabled),
                config: RwLock::new(Arc::new(RegistrySnapshot::default())),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.inner.config.read())
    }

    fn update(&self, f: impl FnOnce(&mut RegistrySnapshot)) {
        let mut config = self.inner.config.write();
        f(Arc::make_mut(&mut config));
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Append a handler; it is dispatched after every handler registered before it
    pub fn register_handler(&self, handler: SharedHandler) -> &Self {
        self.update(|config| config.handlers.push(handler));
        debug!(registry = self.id(), handlers = self.handler_count(), "handler registered");
        self
    }

    /// Append a global tag provider
    pub fn register_tags_provider(&self, provider: SharedTagsProvider) -> &Self {
        self.update(|config| config.tags_providers.push(provider));
        debug!(registry = self.id(), "tags provider registered");
        self
    }

    /// Add a predicate; an observation is created only if every predicate accepts it
    pub fn register_predicate<P>(&self, predicate: P) -> &Self
    where
        P: Fn(&str, &Context) -> bool + Send + Sync + 'static,
    {
        self.update(|config| config.predicates.push(Arc::new(predicate)));
        debug!(registry = self.id(), "observation predicate registered");
        self
    }

    /// Append a filter; filters run at stop in registration order
    pub fn register_filter(&self, filter: SharedFilter) -> &Self {
        self.update(|config| config.filters.push(filter));
        debug!(registry = self.id(), "observation filter registered");
        self
    }

    /// Turn observation creation on or off; running observations are unaffected
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
        debug!(registry = self.id(), enabled, "registry toggled");
    }

    /// Shorthand for `set_enabled(true)`
    pub fn enable(&self) {
        self.set_enabled(true);
    }

    /// Shorthand for `set_enabled(false)`
    pub fn disable(&self) {
        self.set_enabled(false);
    }

    /// Whether new observations are recorded
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.inner.config.read().handlers.len()
    }

    // ------------------------------------------------------------------
    // Factory
    // ------------------------------------------------------------------

    /// Create an observation over an empty context
    pub fn observation(&self, name: impl Into<String>) -> Observation {
        self.observation_with_context(name, Context::new())
    }

    /// Create an observation over `context`
    ///
    /// The observation current on this thread, if any, becomes its parent.
    pub fn observation_with_context(
        &self,
        name: impl Into<String>,
        mut context: Context,
    ) -> Observation {
        context.set_name(name);
        if !self.is_enabled() {
            return Observation::noop();
        }

        let snapshot = self.snapshot();
        if snapshot.handlers.is_empty() {
            return Observation::noop();
        }
        if let Some(predicate) =
            snapshot.predicates.iter().position(|predicate| !predicate(context.name(), &context))
        {
            debug!(
                observation = %context.name(),
                predicate,
                "observation rejected by predicate; using no-op"
            );
            return Observation::noop();
        }

        if let Some(parent) = self.current_observation() {
            context.set_parent_observation(parent);
        }
        Observation::from_parts(self.clone(), context)
    }

    // ------------------------------------------------------------------
    // Current observation
    // ------------------------------------------------------------------

    /// Observation in scope on this thread
    pub fn current_observation(&self) -> Option<Observation> {
        scope::current(self.id())
    }

    /// Make `observation` current on this thread until the guard drops
    ///
    /// Used to carry an observation captured with
    /// [`current_observation`](Self::current_observation) onto another
    /// thread or task. No handler callbacks fire. `None` clears the slot.
    pub fn restore_current(&self, observation: impl Into<Option<Observation>>) -> CurrentGuard {
        CurrentGuard::install(Some(self.id()), observation.into())
    }
}

impl Default for ObservationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
