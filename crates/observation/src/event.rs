//! Point-in-time occurrences inside a running observation.

use std::fmt;

/// Something that happened while an observation was running
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    name: String,
    contextual_name: String,
}

impl Event {
    /// Event whose contextual name equals its name
    pub fn of(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { contextual_name: name.clone(), name }
    }

    /// Event with a separate human-readable name
    pub fn with_contextual_name(
        name: impl Into<String>,
        contextual_name: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), contextual_name: contextual_name.into() }
    }

    /// Low-cardinality event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable name; the event name unless set
    pub fn contextual_name(&self) -> &str {
        &self.contextual_name
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event(name='{}', contextual_name='{}')", self.name, self.contextual_name)
    }
}
