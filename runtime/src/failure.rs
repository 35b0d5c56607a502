//! Failure routing.
//!
//! Every failure the store observes (a reducer returning an error, an effect
//! yielding an error, a subscription failing to start) is handed to the
//! store's [`FailureHandler`]. Returning `true` swallows the failure and
//! processing continues; returning `false` rethrows it:
//!
//! - reducer failures abort the whole `send` call, leaving the previously
//!   published state untouched
//! - effect failures terminate the running effect execution
//! - subscription failures abort store construction
//!
//! Cancellation is never a failure and never reaches the handler.

use ripple_core::{BoxError, EffectError, ReducerError};
use thiserror::Error;

/// A failure observed by the store
#[derive(Error, Debug)]
pub enum Failure {
    /// The reducer rejected an action
    #[error(transparent)]
    Reducer(#[from] ReducerError),

    /// A running effect raised an error
    #[error(transparent)]
    Effect(#[from] EffectError),

    /// A subscription could not be started
    #[error("subscription failed to start: {0}")]
    Subscription(#[source] BoxError),
}

impl Failure {
    /// Short label used in logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Reducer(_) => "reducer",
            Self::Effect(_) => "effect",
            Self::Subscription(_) => "subscription",
        }
    }
}

/// Decides whether a failure is swallowed (`true`) or rethrown (`false`).
pub trait FailureHandler: Send + Sync {
    /// Inspect a failure
    fn handle(&self, failure: &Failure) -> bool;
}

impl<F> FailureHandler for F
where
    F: Fn(&Failure) -> bool + Send + Sync,
{
    fn handle(&self, failure: &Failure) -> bool {
        self(failure)
    }
}

/// Rethrow every failure. The store default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RethrowFailures;

impl FailureHandler for RethrowFailures {
    fn handle(&self, failure: &Failure) -> bool {
        tracing::error!(kind = failure.kind(), error = %failure, "Unhandled failure");
        false
    }
}

/// Log every failure as a warning and keep going.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwallowFailures;

impl FailureHandler for SwallowFailures {
    fn handle(&self, failure: &Failure) -> bool {
        tracing::warn!(kind = failure.kind(), error = %failure, "Ignoring failure");
        true
    }
}
