//! Tag providers and their composition
//!
//! Providers derive classification tags from a [`Context`]. Two scopes
//! compose, resolved once per observation when it starts:
//!
//! 1. global providers registered on the registry, in registration order
//! 2. the provider set on the observation itself, last
//!
//! Both are filtered by the provider's own `supports_context`. Tag sets of
//! the same cardinality merge last-write-wins per key, so an instrumentation
//! can ship a default provider and a caller can layer an additive or
//! overriding provider on top without touching the default.

use std::fmt::Debug;
use std::sync::Arc;

use crate::context::Context;
use crate::key_value::KeyValues;

/// Supplier of low- and high-cardinality tags for a context
pub trait TagsProvider: Send + Sync + Debug {
    /// Whether this provider understands `context`
    fn supports_context(&self, context: &Context) -> bool;

    /// Bounded-value tags, safe as metric labels
    fn low_cardinality_tags(&self, _context: &Context) -> KeyValues {
        KeyValues::empty()
    }

    /// Unbounded-value tags, for traces and logs only
    fn high_cardinality_tags(&self, _context: &Context) -> KeyValues {
        KeyValues::empty()
    }

    /// Replacement for the observation name
    fn name(&self) -> Option<&str> {
        None
    }

    /// Replacement for the contextual name
    fn contextual_name(&self, _context: &Context) -> Option<String> {
        None
    }
}

impl<P: TagsProvider + ?Sized> TagsProvider for Arc<P> {
    fn supports_context(&self, context: &Context) -> bool {
        (**self).supports_context(context)
    }

    fn low_cardinality_tags(&self, context: &Context) -> KeyValues {
        (**self).low_cardinality_tags(context)
    }

    fn high_cardinality_tags(&self, context: &Context) -> KeyValues {
        (**self).high_cardinality_tags(context)
    }

    fn name(&self) -> Option<&str> {
        (**self).name()
    }

    fn contextual_name(&self, context: &Context) -> Option<String> {
        (**self).contextual_name(context)
    }
}

/// Shared, type-erased provider
pub type SharedTagsProvider = Arc<dyn TagsProvider>;

/// Providers resolved for one observation, in application order
#[derive(Debug, Clone, Default)]
pub struct TagsProviderChain {
    providers: Vec<SharedTagsProvider>,
}

impl TagsProviderChain {
    /// Global providers supporting `context`, then `local` if it does too
    pub fn resolve(
        global: &[SharedTagsProvider],
        local: Option<&SharedTagsProvider>,
        context: &Context,
    ) -> Self {
        let providers = global
            .iter()
            .chain(local)
            .filter(|provider| provider.supports_context(context))
            .cloned()
            .collect();
        Self { providers }
    }

    /// Number of resolved providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider supports the context
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Combined low-cardinality tags, later providers overriding earlier
    pub fn low_cardinality_tags(&self, context: &Context) -> KeyValues {
        self.providers
            .iter()
            .fold(KeyValues::empty(), |acc, provider| {
                acc.and(provider.low_cardinality_tags(context))
            })
    }

    /// Combined high-cardinality tags, later providers overriding earlier
    pub fn high_cardinality_tags(&self, context: &Context) -> KeyValues {
        self.providers
            .iter()
            .fold(KeyValues::empty(), |acc, provider| {
                acc.and(provider.high_cardinality_tags(context))
            })
    }

    /// Write the combined tags and any name overrides into `context`
    pub fn apply(&self, context: &mut Context) {
        if self.providers.is_empty() {
            return;
        }
        let low = self.low_cardinality_tags(context);
        let high = self.high_cardinality_tags(context);
        let name = self.providers.iter().rev().find_map(|provider| provider.name());
        let contextual_name =
            self.providers.iter().rev().find_map(|provider| provider.contextual_name(context));

        if let Some(name) = name {
            let name = name.to_string();
            context.set_name(name);
        }
        if let Some(contextual_name) = contextual_name {
            context.set_contextual_name(contextual_name);
        }
        context.add_low_cardinality_key_values(low);
        context.add_high_cardinality_key_values(high);
    }
}

/// Fixed low-cardinality tags applied to every observation
///
/// Typically built from configuration (service name, region, environment).
#[derive(Debug, Clone, Default)]
pub struct CommonTagsProvider {
    tags: KeyValues,
}

impl CommonTagsProvider {
    /// Provider returning `tags` for every context
    pub fn new(tags: KeyValues) -> Self {
        Self { tags }
    }
}

impl TagsProvider for CommonTagsProvider {
    fn supports_context(&self, _context: &Context) -> bool {
        true
    }

    fn low_cardinality_tags(&self, _context: &Context) -> KeyValues {
        self.tags.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TaxDefaults;

    impl TagsProvider for TaxDefaults {
        fn supports_context(&self, _context: &Context) -> bool {
            true
        }

        fn low_cardinality_tags(&self, _context: &Context) -> KeyValues {
            KeyValues::of([("type", "INCOME_TAX")])
        }

        fn high_cardinality_tags(&self, _context: &Context) -> KeyValues {
            KeyValues::of([("tax.id", "default")])
        }
    }

    #[derive(Debug)]
    struct Renaming;

    impl TagsProvider for Renaming {
        fn supports_context(&self, _context: &Context) -> bool {
            true
        }

        fn name(&self) -> Option<&str> {
            Some("tax.renamed")
        }

        fn contextual_name(&self, context: &Context) -> Option<String> {
            Some(format!("calculate {}", context.name()))
        }
    }

    #[derive(Debug)]
    struct Never;

    impl TagsProvider for Never {
        fn supports_context(&self, _context: &Context) -> bool {
            false
        }

        fn low_cardinality_tags(&self, _context: &Context) -> KeyValues {
            KeyValues::of([("type", "IGNORED")])
        }
    }

    #[test]
    fn unsupported_providers_are_left_out() {
        let global: Vec<SharedTagsProvider> = vec![Arc::new(TaxDefaults), Arc::new(Never)];
        let chain = TagsProviderChain::resolve(&global, None, &Context::new());

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.low_cardinality_tags(&Context::new()).get("type"), Some("INCOME_TAX"));
    }

    #[test]
    fn local_provider_is_applied_last() {
        let global: Vec<SharedTagsProvider> = vec![Arc::new(TaxDefaults)];
        let local: SharedTagsProvider =
            Arc::new(CommonTagsProvider::new(KeyValues::of([("type", "VAT")])));
        let chain = TagsProviderChain::resolve(&global, Some(&local), &Context::new());

        assert_eq!(chain.low_cardinality_tags(&Context::new()).get("type"), Some("VAT"));
    }

    #[test]
    fn apply_writes_tags_and_name_overrides() {
        let global: Vec<SharedTagsProvider> = vec![Arc::new(TaxDefaults), Arc::new(Renaming)];
        let mut context = Context::new();
        context.set_name("tax");

        let chain = TagsProviderChain::resolve(&global, None, &context);
        chain.apply(&mut context);

        assert_eq!(context.name(), "tax.renamed");
        assert_eq!(context.contextual_name(), Some("calculate tax"));
        assert_eq!(context.low_cardinality_key_values().get("type"), Some("INCOME_TAX"));
        assert_eq!(context.high_cardinality_key_values().get("tax.id"), Some("default"));
    }
}
