//! Per-thread "current observation" tracking
//!
//! Each thread holds one current-observation slot per registry. Slots follow
//! a strict stack discipline through two RAII guards:
//!
//! - [`ObservationScope`]: opened with [`Observation::open_scope`]; notifies
//!   `on_scope_opened`/`on_scope_closed` on the observation's handlers
//! - [`CurrentGuard`]: installs an observation without any handler callback,
//!   used for explicit propagation ([`ObservationRegistry::restore_current`],
//!   [`Observation::instrument`])
//!
//! Both push onto a per-registry stack and pop their own entry when dropped,
//! on every exit path including unwinding. Both are `!Send`: a guard is
//! released on the thread that created it. Closing twice or closing a scope
//! that was never opened cannot be expressed; closing out of order is
//! logged and never leaves a closed observation current.
//!
//! [`ObservationRegistry::restore_current`]: crate::ObservationRegistry::restore_current

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::observation::Observation;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// One installed value; `None` masks the slot
struct Installed {
    token: u64,
    observation: Option<Observation>,
}

thread_local! {
    static CURRENT: RefCell<HashMap<u64, Vec<Installed>>> = RefCell::new(HashMap::new());
}

/// Observation current on this thread for the registry `registry_id`
pub(crate) fn current(registry_id: u64) -> Option<Observation> {
    CURRENT
        .try_with(|slots| {
            slots
                .borrow()
                .get(&registry_id)
                .and_then(|stack| stack.last())
                .and_then(|installed| installed.observation.clone())
        })
        .ok()
        .flatten()
}

fn push(registry_id: u64, observation: Option<Observation>) -> Option<u64> {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    CURRENT
        .try_with(|slots| {
            slots
                .borrow_mut()
                .entry(registry_id)
                .or_default()
                .push(Installed { token, observation });
        })
        .ok()
        .map(|()| token)
}

/// Remove the entry `token` from the stack of `registry_id`
///
/// Returns the removed entry and whether it was not on top.
fn remove(registry_id: u64, token: u64) -> Option<(Installed, bool)> {
    CURRENT
        .try_with(|slots| {
            let mut slots = slots.borrow_mut();
            let stack = slots.get_mut(&registry_id)?;
            let position = stack.iter().rposition(|installed| installed.token == token)?;
            let out_of_order = position + 1 != stack.len();
            let removed = stack.remove(position);
            if stack.is_empty() {
                slots.remove(&registry_id);
            }
            Some((removed, out_of_order))
        })
        // Thread-local storage is gone during thread teardown; nothing to restore into.
        .ok()
        .flatten()
}

/// Restores the previously current observation when dropped
///
/// Carries no handler callbacks. Guards are expected to drop in reverse
/// order of installation. A guard dropped out of order removes only its
/// own entry and logs a warning, so the observations still installed
/// above it stay current.
#[must_use = "the previous observation is restored as soon as the guard is dropped"]
pub struct CurrentGuard {
    installed: Option<(u64, u64)>,
    _not_send: PhantomData<*const ()>,
}

impl CurrentGuard {
    /// Make `observation` current in the slot of `registry_id`
    ///
    /// Without a registry id (a no-op observation) the guard does nothing.
    pub(crate) fn install(registry_id: Option<u64>, observation: Option<Observation>) -> Self {
        let installed =
            registry_id.and_then(|id| push(id, observation).map(|token| (id, token)));
        Self { installed, _not_send: PhantomData }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let Some((registry_id, token)) = self.installed.take() else {
            return;
        };
        if let Some((removed, true)) = remove(registry_id, token) {
            warn!(
                registry = registry_id,
                observation = ?removed.observation,
                "current observation released out of order"
            );
        }
    }
}

impl fmt::Debug for CurrentGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentGuard")
            .field("registry", &self.installed.map(|(id, _)| id))
            .field("active", &self.installed.is_some())
            .finish()
    }
}

/// An opened scope of one observation on the current thread
///
/// ```
/// use std::sync::Arc;
///
/// use observa_core::{Context, Observation, ObservationHandler, ObservationRegistry};
///
/// #[derive(Debug)]
/// struct Silent;
///
/// impl ObservationHandler for Silent {
///     fn supports_context(&self, _context: &Context) -> bool {
///         true
///     }
/// }
///
/// let registry = ObservationRegistry::new();
/// registry.register_handler(Arc::new(Silent));
///
/// let observation = Observation::create("import", &registry);
/// let scope = observation.open_scope();
/// assert_eq!(registry.current_observation(), Some(observation.clone()));
/// scope.close();
/// assert_eq!(registry.current_observation(), None);
/// ```
#[must_use = "the scope closes as soon as it is dropped"]
pub struct ObservationScope {
    observation: Observation,
    guard: Option<CurrentGuard>,
}

impl ObservationScope {
    pub(crate) fn open(observation: Observation) -> Self {
        let guard = CurrentGuard::install(observation.registry_id(), Some(observation.clone()));
        observation.notify_scope_opened();
        Self { observation, guard: Some(guard) }
    }

    /// Observation this scope was opened for
    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    /// Close the scope, restoring the previous observation
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            // The guard restores the slot even if a handler panics here.
            self.observation.notify_scope_closed();
            drop(guard);
        }
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ObservationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationScope")
            .field("observation", &self.observation)
            .field("open", &self.guard.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::ObservationRegistry;
    use crate::testing::{HandlerEventKind, HandlerLog, RecordingHandler};

    fn registry_with(log: &HandlerLog) -> ObservationRegistry {
        let registry = ObservationRegistry::new();
        registry.register_handler(Arc::new(RecordingHandler::new("recorder", log)));
        registry
    }

    #[test]
    fn guard_restores_previous_value() {
        let log = HandlerLog::new();
        let registry = registry_with(&log);
        let outer = Observation::create("outer", &registry);
        let inner = Observation::create("inner", &registry);

        let _outer = registry.restore_current(outer.clone());
        {
            let _inner = registry.restore_current(inner.clone());
            assert_eq!(registry.current_observation(), Some(inner));
        }
        assert_eq!(registry.current_observation(), Some(outer));
        assert!(log.is_empty(), "restoring must not notify handlers");
    }

    #[test]
    fn scope_notifies_open_and_close() {
        let log = HandlerLog::new();
        let registry = registry_with(&log);
        let observation = Observation::create("job", &registry);
        observation.start().expect("fresh observation starts");

        observation.open_scope().close();

        assert_eq!(
            log.kinds_for("recorder"),
            vec![
                HandlerEventKind::Start,
                HandlerEventKind::ScopeOpened,
                HandlerEventKind::ScopeClosed
            ]
        );
    }

    #[test]
    fn slots_of_different_registries_are_independent() {
        let log = HandlerLog::new();
        let first = registry_with(&log);
        let second = registry_with(&log);
        let observation = Observation::create("job", &first);

        let _scope = observation.open_scope();
        assert_eq!(first.current_observation(), Some(observation.clone()));
        assert_eq!(second.current_observation(), None);
    }

    #[test]
    fn noop_scope_leaves_slot_untouched() {
        let registry = ObservationRegistry::noop();
        let observation = Observation::create("job", &registry);

        let _scope = observation.open_scope();
        assert_eq!(registry.current_observation(), None);
    }

    #[test]
    fn out_of_order_close_keeps_open_scope_current() {
        let log = HandlerLog::new();
        let registry = registry_with(&log);
        let a = Observation::start_new("a", &registry).expect("start a");
        let b = Observation::start_new("b", &registry).expect("start b");

        let scope_a = a.open_scope();
        let scope_b = b.open_scope();

        scope_a.close();
        assert_eq!(registry.current_observation(), Some(b.clone()));

        scope_b.close();
        assert_eq!(registry.current_observation(), None);
    }

    #[test]
    fn cleared_slot_masks_outer_observation() {
        let log = HandlerLog::new();
        let registry = registry_with(&log);
        let outer = Observation::create("outer", &registry);

        let _outer = registry.restore_current(outer.clone());
        {
            let _cleared = registry.restore_current(None::<Observation>);
            assert_eq!(registry.current_observation(), None);
        }
        assert_eq!(registry.current_observation(), Some(outer));
    }

}
