//! Per-observation data carrier
//!
//! A [`Context`] is created with its observation and travels through every
//! handler callback. It holds:
//!
//! - the observation name and an optional contextual (human-readable) name
//! - a type-keyed value store: one value per distinct Rust type, last write
//!   wins. Callers wanting two values of the same underlying type should wrap
//!   them in newtypes.
//! - the captured error of the instrumented operation, if any
//! - low- and high-cardinality tag sets, accumulated additively
//! - an optional *shape*: a domain payload that narrows what kind of context
//!   this is. Handler and provider predicates test for it with
//!   [`Context::is_shape`] instead of the dispatcher knowing concrete types.
//!
//! Lookups use `TypeId` and checked downcasts, so a mismatched `put`/`get`
//! pair simply returns `None`.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use crate::key_value::{KeyValue, KeyValues};
use crate::observation::Observation;

/// Type-erased, thread-safe stored value
type StoredValue = Box<dyn Any + Send + Sync>;

/// Snapshot of an error raised by the instrumented operation
///
/// The original error value stays with the caller (it is returned unchanged
/// from [`Observation::scoped`]); handlers see this copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    type_name: &'static str,
    message: String,
    sources: Vec<String>,
}

impl CapturedError {
    /// Capture type, message and source chain of `error`
    pub fn capture<E: Error + ?Sized>(error: &E) -> Self {
        let mut sources = Vec::new();
        let mut source = error.source();
        while let Some(inner) = source {
            sources.push(inner.to_string());
            source = inner.source();
        }
        Self { type_name: type_name::<E>(), message: error.to_string(), sources }
    }

    /// Fully qualified type name of the captured error
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Short type name, suitable as a low-cardinality tag value
    ///
    /// `std::num::ParseIntError` becomes `ParseIntError`.
    /// Trait-object errors report the trait, so `Box<dyn Error + Send>`'s
    /// contents become `Error`.
    pub fn kind(&self) -> &'static str {
        let without_generics = self.type_name.split('<').next().unwrap_or(self.type_name);
        let path = without_generics.split(" + ").next().unwrap_or(without_generics);
        let path = path.strip_prefix("dyn ").unwrap_or(path);
        path.rsplit("::").next().unwrap_or(path)
    }

    /// Display message of the captured error
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Messages of the source chain, outermost first
    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message)
    }
}

impl Error for CapturedError {}

/// Error values an observation can record
///
/// Implemented for every [`Error`] type and for boxed trait-object errors,
/// which do not implement [`Error`] themselves. `Form` only keeps the two
/// impl families apart and is always inferred at the call site.
pub trait ObservedError<Form> {
    /// Snapshot handed to handlers
    fn to_captured(&self) -> CapturedError;
}

/// [`ObservedError`] form of types implementing [`Error`]
#[derive(Debug)]
pub enum TypedError {}

/// [`ObservedError`] form of boxed trait-object errors
#[derive(Debug)]
pub enum BoxedError {}

impl<E: Error + ?Sized> ObservedError<TypedError> for E {
    fn to_captured(&self) -> CapturedError {
        CapturedError::capture(self)
    }
}

impl ObservedError<BoxedError> for Box<dyn Error> {
    fn to_captured(&self) -> CapturedError {
        CapturedError::capture(&**self)
    }
}

impl ObservedError<BoxedError> for Box<dyn Error + Send> {
    fn to_captured(&self) -> CapturedError {
        CapturedError::capture(&**self)
    }
}

impl ObservedError<BoxedError> for Box<dyn Error + Send + Sync> {
    fn to_captured(&self) -> CapturedError {
        CapturedError::capture(&**self)
    }
}

#[cfg(feature = "anyhow")]
impl ObservedError<BoxedError> for anyhow::Error {
    fn to_captured(&self) -> CapturedError {
        CapturedError::capture(&**self)
    }
}

/// Mutable bag attached to exactly one observation
#[derive(Default)]
pub struct Context {
    name: String,
    contextual_name: Option<String>,
    error: Option<CapturedError>,
    low_cardinality: KeyValues,
    high_cardinality: KeyValues,
    values: HashMap<TypeId, StoredValue>,
    shape: Option<StoredValue>,
    parent: Option<Observation>,
}

impl Context {
    /// Plain context without a shape
    pub fn new() -> Self {
        Self::default()
    }

    /// Context carrying a domain shape
    ///
    /// ```
    /// use observa_core::Context;
    ///
    /// struct HttpRequest {
    ///     method: &'static str,
    /// }
    ///
    /// let context = Context::shaped(HttpRequest { method: "GET" });
    /// assert!(context.is_shape::<HttpRequest>());
    /// assert_eq!(context.shape::<HttpRequest>().map(|r| r.method), Some("GET"));
    /// ```
    pub fn shaped<S: Any + Send + Sync>(shape: S) -> Self {
        Self { shape: Some(Box::new(shape)), ..Self::default() }
    }

    // ------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------

    /// Low-cardinality operation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the observation name
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Human-readable name, if one was set
    pub fn contextual_name(&self) -> Option<&str> {
        self.contextual_name.as_deref()
    }

    /// Replace the human-readable name
    pub fn set_contextual_name(&mut self, contextual_name: impl Into<String>) {
        self.contextual_name = Some(contextual_name.into());
    }

    // ------------------------------------------------------------------
    // Type-keyed values
    // ------------------------------------------------------------------

    /// Store `value` under its type, returning the value it replaced
    pub fn put<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    /// Value stored under type `T`
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>()).and_then(|value| (**value).downcast_ref::<T>())
    }

    /// Mutable access to the value of type `T`
    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.values.get_mut(&TypeId::of::<T>()).and_then(|value| (**value).downcast_mut::<T>())
    }

    /// Value of type `T`, inserting the result of `init` first if absent
    pub fn get_or_insert_with<T, F>(&mut self, init: F) -> &mut T
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let slot =
            self.values.entry(TypeId::of::<T>()).or_insert_with(|| Box::new(init()) as StoredValue);
        match (**slot).downcast_mut::<T>() {
            Some(value) => value,
            // Entries are only ever inserted under their own TypeId.
            None => unreachable!("slot for {} holds a foreign type", type_name::<T>()),
        }
    }

    /// Remove and return the value of type `T`
    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Whether a value of type `T` is stored
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    // ------------------------------------------------------------------
    // Shape
    // ------------------------------------------------------------------

    /// Whether this context was built with a shape of type `S`
    pub fn is_shape<S: Any + Send + Sync>(&self) -> bool {
        self.shape.as_ref().is_some_and(|shape| (**shape).is::<S>())
    }

    /// The shape, if it is an `S`
    pub fn shape<S: Any + Send + Sync>(&self) -> Option<&S> {
        self.shape.as_ref().and_then(|shape| (**shape).downcast_ref::<S>())
    }

    /// Mutable access to the shape, if it is an `S`
    pub fn shape_mut<S: Any + Send + Sync>(&mut self) -> Option<&mut S> {
        self.shape.as_mut().and_then(|shape| (**shape).downcast_mut::<S>())
    }

    // ------------------------------------------------------------------
    // Error slot
    // ------------------------------------------------------------------

    /// Error recorded by the instrumented operation
    pub fn error(&self) -> Option<&CapturedError> {
        self.error.as_ref()
    }

    /// First write wins; returns `false` when an error was already present
    pub(crate) fn record_error(&mut self, error: CapturedError) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(error);
        true
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    /// Bounded-value tags
    pub fn low_cardinality_key_values(&self) -> &KeyValues {
        &self.low_cardinality
    }

    /// Unbounded-value tags
    pub fn high_cardinality_key_values(&self) -> &KeyValues {
        &self.high_cardinality
    }

    /// Add one low-cardinality tag, replacing any value under the same key
    pub fn add_low_cardinality_key_value(&mut self, key_value: impl Into<KeyValue>) {
        self.low_cardinality.insert(key_value.into());
    }

    /// Add one high-cardinality tag, replacing any value under the same key
    pub fn add_high_cardinality_key_value(&mut self, key_value: impl Into<KeyValue>) {
        self.high_cardinality.insert(key_value.into());
    }

    /// Merge low-cardinality tags; incoming values win
    pub fn add_low_cardinality_key_values(&mut self, key_values: KeyValues) {
        self.low_cardinality.merge(key_values);
    }

    /// Merge high-cardinality tags; incoming values win
    pub fn add_high_cardinality_key_values(&mut self, key_values: KeyValues) {
        self.high_cardinality.merge(key_values);
    }

    /// Low- and high-cardinality tags merged, high winning on key clashes
    pub fn all_key_values(&self) -> KeyValues {
        self.low_cardinality.clone().and(self.high_cardinality.clone())
    }

    // ------------------------------------------------------------------
    // Parent
    // ------------------------------------------------------------------

    /// Observation that was current when this one was created
    pub fn parent_observation(&self) -> Option<&Observation> {
        self.parent.as_ref()
    }

    pub(crate) fn set_parent_observation(&mut self, parent: Observation) {
        self.parent = Some(parent);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("contextual_name", &self.contextual_name)
            .field("error", &self.error)
            .field("low_cardinality", &self.low_cardinality)
            .field("high_cardinality", &self.high_cardinality)
            .field("values", &self.values.len())
            .field("shaped", &self.shape.is_some())
            .field("parent", &self.parent)
            .finish()
    }
}
