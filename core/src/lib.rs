//! # Ripple Core
//!
//! Core traits and types for the Ripple architecture.
//!
//! This crate provides the fundamental abstractions for building applications
//! around a single state value that only changes through reducers:
//!
//! ## Core Concepts
//!
//! - **State**: The single value describing a feature at a point in time
//! - **Action**: A discrete event that may transform the state
//! - **Reducer**: `(State, Action, Environment) → (State, Effect)`
//! - **Effect**: A description of asynchronous work that feeds actions back
//! - **Environment**: Injected dependencies via traits
//!
//! Reducers never execute effects. They return [`Effect`] values which the
//! runtime (`ripple-runtime`) starts after the new state has been published.
//!
//! ## Example
//!
//! ```
//! use ripple_core::{Effect, Reducer, ReduceResult};
//!
//! #[derive(Clone, Debug, Default, PartialEq)]
//! struct CounterState {
//!     count: i64,
//! }
//!
//! #[derive(Clone, Debug, PartialEq)]
//! enum CounterAction {
//!     Increment,
//!     IncrementLater,
//! }
//!
//! struct CounterReducer;
//!
//! impl Reducer for CounterReducer {
//!     type State = CounterState;
//!     type Action = CounterAction;
//!     type Environment = ();
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CounterState,
//!         action: CounterAction,
//!         _env: &(),
//!     ) -> ReduceResult<CounterAction> {
//!         match action {
//!             CounterAction::Increment => {
//!                 state.count += 1;
//!                 Ok(Effect::none())
//!             },
//!             CounterAction::IncrementLater => Ok(Effect::future(async {
//!                 Some(CounterAction::Increment)
//!             })),
//!         }
//!     }
//! }
//!
//! let mut state = CounterState::default();
//! let effect = CounterReducer.reduce(&mut state, CounterAction::Increment, &());
//! assert_eq!(state.count, 1);
//! assert!(effect.map(|e| e.is_none()).unwrap_or(false));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Cancellation identifiers and the registry of running cancellable effects
pub mod cancellation;

/// Reducer composition utilities
pub mod composition;

/// Effect descriptions and combinators
pub mod effect;

/// Error types shared by reducers and effects
pub mod error;

pub use cancellation::{CancelId, CancellationRegistry};
pub use effect::Effect;
pub use error::{BoxError, EffectError, ReducerError};
pub use reducer::{from_fn, FnReducer, ReduceResult, Reducer};

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effect)`
///
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use super::error::ReducerError;
    use std::sync::Arc;

    /// Result of a single reduce call.
    ///
    /// On success the state passed to [`Reducer::reduce`] is the authoritative
    /// post-transition state and the effect is inert until a store runs it.
    pub type ReduceResult<A> = Result<Effect<A>, ReducerError>;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// Reducers hold no mutable fields. Anything that has to outlive a single
    /// reduce call (in-flight tracking, debouncing) lives in the store or the
    /// [`CancellationRegistry`](crate::CancellationRegistry).
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for SearchReducer {
    ///     type State = SearchState;
    ///     type Action = SearchAction;
    ///     type Environment = SearchEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut SearchState,
    ///         action: SearchAction,
    ///         env: &SearchEnvironment,
    ///     ) -> ReduceResult<SearchAction> {
    ///         match action {
    ///             SearchAction::QueryChanged(query) => {
    ///                 state.query = query.clone();
    ///                 let client = env.client.clone();
    ///                 Ok(Effect::future(async move {
    ///                     client.search(&query).await.ok().map(SearchAction::Results)
    ///                 })
    ///                 .debounce("search", Duration::from_millis(300)))
    ///             },
    ///             SearchAction::Results(results) => {
    ///                 state.results = results;
    ///                 Ok(Effect::none())
    ///             },
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and an effect
        ///
        /// # Arguments
        ///
        /// - `state`: Mutable reference to the working copy of the state
        /// - `action`: The action to process
        /// - `env`: Reference to injected dependencies
        ///
        /// # Errors
        ///
        /// Returns a [`ReducerError`] when the action cannot be applied. The
        /// store discards whatever the reducer wrote to `state` in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> ReduceResult<Self::Action>;
    }

    impl<R> Reducer for Box<R>
    where
        R: Reducer + ?Sized,
    {
        type State = R::State;
        type Action = R::Action;
        type Environment = R::Environment;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> ReduceResult<Self::Action> {
            (**self).reduce(state, action, env)
        }
    }

    impl<R> Reducer for Arc<R>
    where
        R: Reducer + ?Sized,
    {
        type State = R::State;
        type Action = R::Action;
        type Environment = R::Environment;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> ReduceResult<Self::Action> {
            (**self).reduce(state, action, env)
        }
    }

    /// A reducer backed by a closure.
    ///
    /// Created by [`from_fn`].
    pub struct FnReducer<S, A, E, F> {
        f: F,
        _phantom: std::marker::PhantomData<fn(S, A, E)>,
    }

    impl<S, A, E, F: Clone> Clone for FnReducer<S, A, E, F> {
        fn clone(&self) -> Self {
            Self {
                f: self.f.clone(),
                _phantom: std::marker::PhantomData,
            }
        }
    }

    impl<S, A, E, F> std::fmt::Debug for FnReducer<S, A, E, F> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FnReducer").finish_non_exhaustive()
        }
    }

    /// Build a reducer from a closure.
    ///
    /// # Example
    ///
    /// ```
    /// use ripple_core::{from_fn, Effect, Reducer};
    ///
    /// let reducer = from_fn(|count: &mut i32, delta: i32, _env: &()| {
    ///     *count += delta;
    ///     Ok(Effect::none())
    /// });
    ///
    /// let mut count = 1;
    /// let _ = reducer.reduce(&mut count, 2, &());
    /// assert_eq!(count, 3);
    /// ```
    pub const fn from_fn<S, A, E, F>(f: F) -> FnReducer<S, A, E, F>
    where
        F: Fn(&mut S, A, &E) -> ReduceResult<A>,
    {
        FnReducer {
            f,
            _phantom: std::marker::PhantomData,
        }
    }

    impl<S, A, E, F> Reducer for FnReducer<S, A, E, F>
    where
        F: Fn(&mut S, A, &E) -> ReduceResult<A>,
    {
        type State = S;
        type Action = A;
        type Environment = E;

        fn reduce(&self, state: &mut S, action: A, env: &E) -> ReduceResult<A> {
            (self.f)(state, action, env)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = FixedClock::new(time);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
