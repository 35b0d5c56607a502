//! # Ripple Runtime
//!
//! Runtime implementation for the Ripple architecture.
//!
//! This crate provides the [`Store`] that coordinates reducer execution and
//! effect handling.
//!
//! ## Core Components
//!
//! - **Store**: Owns the canonical state and a single-writer action queue
//! - **Effect Executor**: Interprets effect descriptions against a cancellation registry
//! - **Failure routing**: Decides whether reducer, effect and subscription failures are fatal
//! - **Scoped stores**: Views of part of a store's state with a local action type
//!
//! ## Example
//!
//! ```ignore
//! use ripple_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action and wait for the effects it started
//! let mut handle = store.send(Action::DoSomething).await?;
//! handle.wait().await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field);
//! ```

/// Effect interpretation
pub mod executor;

/// Failure handlers
pub mod failure;

/// Prometheus metrics for observability
pub mod metrics;

/// Scoped views of a store
pub mod scope;

/// The Store and its builder
pub mod store;

/// Subscriptions started with the store
pub mod subscription;

/// Error types for the Store runtime
pub mod error {
    use crate::failure::Failure;
    use ripple_core::{BoxError, ReducerError};
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// The reducer rejected an action and the failure handler rethrew
        ///
        /// Nothing from the batch was published.
        #[error(transparent)]
        Reducer(#[from] ReducerError),

        /// An effect execution was stopped by an unhandled failure
        #[error("Effect execution failed: {0}")]
        EffectFailed(String),

        /// An effect panicked
        #[error("Effect panicked: {0}")]
        EffectPanicked(String),

        /// A subscription could not be started
        #[error("Subscription failed to start: {0}")]
        SubscriptionFailed(#[source] BoxError),

        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// Some effects were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for an action or an effect
        #[error("Timeout waiting for action")]
        Timeout,

        /// The store's writer or its action broadcast has stopped
        #[error("Store channel closed")]
        ChannelClosed,

        /// A scoped store was sent an action while its state is absent
        #[error("Scoped state is not available")]
        StateUnavailable,
    }

    impl From<Failure> for StoreError {
        fn from(failure: Failure) -> Self {
            match failure {
                Failure::Reducer(error) => Self::Reducer(error),
                Failure::Effect(error) => Self::EffectFailed(error.to_string()),
                Failure::Subscription(error) => Self::SubscriptionFailed(error),
            }
        }
    }
}

pub use error::StoreError;
pub use failure::{Failure, FailureHandler, RethrowFailures, SwallowFailures};
pub use scope::ScopedStore;
pub use store::{
    EffectHandle, EffectInfo, ExecutionId, ExecutionStatus, Store, StoreBuilder, StoreConfig,
};
pub use subscription::Subscription;

// Re-exported so applications only need one import for the common types.
pub use ripple_core::{CancelId, CancellationRegistry, Effect, Reducer};
