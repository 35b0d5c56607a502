//! Error types for reducers and effects.
//!
//! Cancellation is deliberately absent: a cancelled effect simply stops
//! producing actions and never surfaces as an error.

use thiserror::Error;

/// Boxed, thread-safe error used at the boundaries where callers bring
/// their own error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while computing a reduce call.
#[derive(Error, Debug)]
pub enum ReducerError {
    /// A keyed-collection reducer received an action for an element that
    /// does not exist.
    ///
    /// This always indicates that state and actions went out of sync, so it
    /// is never silently ignored.
    #[error("no element for key `{key}` in collection `{collection}`")]
    MissingElement {
        /// Name of the collection the key was looked up in
        collection: &'static str,
        /// Debug rendering of the missing key
        key: String,
    },

    /// Application-defined failure
    #[error("reducer failed: {0}")]
    Failed(#[source] BoxError),
}

impl ReducerError {
    /// Wrap an application error (or message) as a reducer failure.
    #[must_use]
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }

    /// Build a [`ReducerError::MissingElement`] for `key`.
    #[must_use]
    pub fn missing_element(collection: &'static str, key: &impl std::fmt::Debug) -> Self {
        Self::MissingElement {
            collection,
            key: format!("{key:?}"),
        }
    }
}

/// Failure raised while an effect was producing an action.
#[derive(Error, Debug)]
#[error("effect failed: {source}")]
pub struct EffectError {
    #[source]
    source: BoxError,
}

impl EffectError {
    /// Wrap an error raised by effect work.
    #[must_use]
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self {
            source: error.into(),
        }
    }

    /// The underlying error.
    #[must_use]
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}
