//! Handler groups that present several handlers as one
//!
//! A group is registered like any other handler. Which children take part is
//! decided in `on_start` from the context at that moment and remembered in
//! the context, so a group never changes membership mid-observation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ObservationHandler, SharedHandler};
use crate::context::Context;
use crate::event::Event;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Children selected by each group for one observation, keyed by group id
#[derive(Debug, Default)]
struct GroupSelections {
    by_group: HashMap<u64, Vec<usize>>,
}

/// Shared plumbing of both group kinds
#[derive(Debug)]
struct HandlerGroup {
    id: u64,
    handlers: Vec<SharedHandler>,
}

impl HandlerGroup {
    fn new(handlers: Vec<SharedHandler>) -> Self {
        Self { id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed), handlers }
    }

    fn any_supports(&self, context: &Context) -> bool {
        self.handlers.iter().any(|handler| handler.supports_context(context))
    }

    fn select(&self, context: &mut Context, first_only: bool) {
        let mut selected: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, handler)| handler.supports_context(context))
            .map(|(index, _)| index)
            .collect();
        if first_only {
            selected.truncate(1);
        }
        context.get_or_insert_with(GroupSelections::default).by_group.insert(self.id, selected);
    }

    fn selected<'a>(&'a self, context: &Context) -> Vec<&'a SharedHandler> {
        context
            .get::<GroupSelections>()
            .and_then(|selections| selections.by_group.get(&self.id))
            .map(|indices| indices.iter().filter_map(|&index| self.handlers.get(index)).collect())
            .unwrap_or_default()
    }

    fn for_each_mut(
        &self,
        context: &mut Context,
        mut callback: impl FnMut(&SharedHandler, &mut Context),
    ) {
        for handler in self.selected(context) {
            callback(handler, context);
        }
    }
}

/// Delegates to the first child that supports the context
///
/// Useful when several mutually exclusive handlers could apply, for example
/// a specialised HTTP-server handler placed before a generic fallback.
#[derive(Debug)]
pub struct FirstMatchingCompositeHandler {
    group: HandlerGroup,
}

impl FirstMatchingCompositeHandler {
    /// Children in priority order
    pub fn new(handlers: Vec<SharedHandler>) -> Self {
        Self { group: HandlerGroup::new(handlers) }
    }
}

impl ObservationHandler for FirstMatchingCompositeHandler {
    fn supports_context(&self, context: &Context) -> bool {
        self.group.any_supports(context)
    }

    fn on_start(&self, context: &mut Context) {
        self.group.select(context, true);
        self.group.for_each_mut(context, |handler, context| handler.on_start(context));
    }

    fn on_error(&self, context: &mut Context) {
        self.group.for_each_mut(context, |handler, context| handler.on_error(context));
    }

    fn on_event(&self, event: &Event, context: &mut Context) {
        self.group.for_each_mut(context, |handler, context| handler.on_event(event, context));
    }

    fn on_scope_opened(&self, context: &mut Context) {
        self.group.for_each_mut(context, |handler, context| handler.on_scope_opened(context));
    }

    fn on_scope_closed(&self, context: &mut Context) {
        self.group.for_each_mut(context, |handler, context| handler.on_scope_closed(context));
    }

    fn on_stop(&self, context: &Context) {
        for handler in self.group.selected(context) {
            handler.on_stop(context);
        }
    }
}

/// Delegates to every child that supports the context, in order
#[derive(Debug)]
pub struct AllMatchingCompositeHandler {
    group: HandlerGroup,
}

impl AllMatchingCompositeHandler {
    /// Children in dispatch order
    pub fn new(handlers: Vec<SharedHandler>) -> Self {
        Self { group: HandlerGroup::new(handlers) }
    }
}

impl ObservationHandler for AllMatchingCompositeHandler {
    fn supports_context(&self, context: &Context) -> bool {
        self.group.any_supports(context)
    }

    fn on_start(&self, context: &mut Context) {
        self.group.select(context, false);
        self.group.for_each_mut(context, |handler, context| handler.on_start(context));
    }

    fn on_error(&self, context: &mut Context) {
        self.group.for_each_mut(context, |handler, context| handler.on_error(context));
    }

    fn on_event(&self, event: &Event, context: &mut Context) {
        self.group.for_each_mut(context, |handler, context| handler.on_event(event, context));
    }

    fn on_scope_opened(&self, context: &mut Context) {
        self.group.for_each_mut(context, |handler, context| handler.on_scope_opened(context));
    }

    fn on_scope_closed(&self, context: &mut Context) {
        self.group.for_each_mut(context, |handler, context| handler.on_scope_closed(context));
    }

    fn on_stop(&self, context: &Context) {
        for handler in self.group.selected(context) {
            handler.on_stop(context);
        }
    }
}
