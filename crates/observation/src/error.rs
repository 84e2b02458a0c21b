//! Usage errors raised by the observation kernel
//!
//! Only programmer mistakes live here: illegal lifecycle transitions and
//! broken configuration. Errors produced by the instrumented operation itself
//! are domain data and travel through [`Context`](crate::Context) as a
//! [`CapturedError`](crate::CapturedError) instead.

use thiserror::Error;

/// Standard result type for kernel operations
pub type ObservationResult<T> = Result<T, ObservationError>;

/// Errors returned by lifecycle transitions and configuration loading
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ObservationError {
    /// The transition requires a started observation
    #[error("observation '{name}' has not been started")]
    NotStarted {
        /// Observation name
        name: String,
    },

    /// `start()` was invoked a second time
    #[error("observation '{name}' has already been started")]
    AlreadyStarted {
        /// Observation name
        name: String,
    },

    /// `error()` was invoked on an observation that already carries an error
    #[error("observation '{name}' has already recorded an error")]
    AlreadyErrored {
        /// Observation name
        name: String,
    },

    /// The observation reached its terminal state
    #[error("observation '{name}' has already been stopped")]
    AlreadyStopped {
        /// Observation name
        name: String,
    },

    /// Registry configuration could not be loaded or is invalid
    #[error("configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },
}

impl ObservationError {
    /// Build a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Whether this error reports an illegal lifecycle transition
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::NotStarted { .. }
                | Self::AlreadyStarted { .. }
                | Self::AlreadyErrored { .. }
                | Self::AlreadyStopped { .. }
        )
    }

    /// Observation name the error refers to, if any
    pub fn observation_name(&self) -> Option<&str> {
        match self {
            Self::NotStarted { name }
            | Self::AlreadyStarted { name }
            | Self::AlreadyErrored { name }
            | Self::AlreadyStopped { name } => Some(name),
            Self::Config { .. } => None,
        }
    }
}
