//! # Counter Example
//!
//! A counter demonstrating the Ripple architecture.
//!
//! This example showcases:
//! - A reducer that is a pure function of state and action
//! - A one-shot effect that loads a fact about the current count
//! - A long-living, cancellable timer stream
//! - Dependency injection through the environment (clock, fact client)
//!
//! ## Example
//!
//! ```no_run
//! use counter::{CounterAction, CounterEnvironment, CounterReducer, CounterState};
//! use ripple_runtime::Store;
//! use ripple_testing::test_clock;
//!
//! # async fn example() -> Result<(), ripple_runtime::StoreError> {
//! let env = CounterEnvironment::local(test_clock());
//! let store = Store::new(CounterState::default(), CounterReducer::new(), env);
//!
//! store.send(CounterAction::Increment).await?;
//! assert_eq!(store.state(|s| s.count), 1);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use ripple_core::{environment::Clock, CancelId, Effect, ReduceResult, Reducer};
use ripple_testing::StateDiff;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Counter state
#[derive(StateDiff, Debug, Clone, Default, PartialEq)]
pub struct CounterState {
    /// Current count value
    pub count: i64,
    /// Last fact loaded about the count
    pub fact: Option<String>,
    /// Whether a fact request is in flight
    pub loading: bool,
    /// Why the last fact request failed
    pub error: Option<String>,
    /// Whether the timer is ticking
    pub timer_running: bool,
    /// When the count last changed
    pub changed_at: Option<DateTime<Utc>>,
}

/// Counter actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterAction {
    /// Increment the counter by 1
    Increment,
    /// Decrement the counter by 1
    Decrement,
    /// Reset the counter to 0
    Reset,
    /// Ask the fact client about the current count
    FactRequested,
    /// A fact arrived
    FactLoaded(String),
    /// The fact client failed
    FactFailed(String),
    /// Start or stop the timer
    TimerToggled,
    /// One timer period elapsed
    TimerTicked,
}

/// Cancellation identifiers for the counter's effects
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum CounterEffect {
    /// The in-flight fact request
    Fact,
    /// The running timer
    Timer,
}

/// Error returned by a [`FactClient`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("fact lookup failed: {0}")]
pub struct FactError(pub String);

/// Looks up a fact about a number
pub trait FactClient: Send + Sync {
    /// Fetch a fact about `number`
    fn fact(&self, number: i64) -> BoxFuture<'static, Result<String, FactError>>;
}

/// Fact client that answers locally after a fixed latency
#[derive(Debug, Clone)]
pub struct LocalFacts {
    latency: Duration,
}

impl LocalFacts {
    /// Answer after `latency`
    #[must_use]
    pub const fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl FactClient for LocalFacts {
    fn fact(&self, number: i64) -> BoxFuture<'static, Result<String, FactError>> {
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            Ok(match number {
                0 => "0 is the additive identity.".to_string(),
                n if n % 2 == 0 => format!("{n} is even."),
                n => format!("{n} is odd."),
            })
        }
        .boxed()
    }
}

/// Counter environment
pub struct CounterEnvironment<C: Clock> {
    /// Clock stamping count changes
    pub clock: C,
    /// Where facts come from
    pub facts: Arc<dyn FactClient>,
    /// Timer period
    pub tick: Duration,
}

impl<C: Clock> CounterEnvironment<C> {
    /// Create a counter environment
    #[must_use]
    pub fn new(clock: C, facts: Arc<dyn FactClient>, tick: Duration) -> Self {
        Self { clock, facts, tick }
    }

    /// Environment with [`LocalFacts`] and a one second timer
    #[must_use]
    pub fn local(clock: C) -> Self {
        Self::new(
            clock,
            Arc::new(LocalFacts::new(Duration::from_millis(200))),
            Duration::from_secs(1),
        )
    }
}

/// Counter reducer
///
/// Generic over the Clock type C to work with any clock implementation.
#[derive(Debug, Clone, Copy)]
pub struct CounterReducer<C> {
    _phantom: std::marker::PhantomData<C>,
}

impl<C> CounterReducer<C> {
    /// Create a new counter reducer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<C> Default for CounterReducer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Reducer for CounterReducer<C> {
    type State = CounterState;
    type Action = CounterAction;
    type Environment = CounterEnvironment<C>;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> ReduceResult<Self::Action> {
        match action {
            CounterAction::Increment | CounterAction::TimerTicked => {
                state.count += 1;
                state.changed_at = Some(env.clock.now());
                Ok(Effect::none())
            },
            CounterAction::Decrement => {
                state.count -= 1;
                state.changed_at = Some(env.clock.now());
                Ok(Effect::none())
            },
            CounterAction::Reset => {
                state.count = 0;
                state.changed_at = Some(env.clock.now());
                Ok(Effect::none())
            },
            CounterAction::FactRequested => {
                state.loading = true;
                state.fact = None;
                state.error = None;

                let facts = Arc::clone(&env.facts);
                let number = state.count;
                Ok(Effect::future(async move {
                    Some(match facts.fact(number).await {
                        Ok(fact) => CounterAction::FactLoaded(fact),
                        Err(error) => CounterAction::FactFailed(error.to_string()),
                    })
                })
                .cancellable(CancelId::new(CounterEffect::Fact), true))
            },
            CounterAction::FactLoaded(fact) => {
                state.loading = false;
                state.fact = Some(fact);
                Ok(Effect::none())
            },
            CounterAction::FactFailed(error) => {
                state.loading = false;
                state.error = Some(error);
                Ok(Effect::none())
            },
            CounterAction::TimerToggled => {
                state.timer_running = !state.timer_running;
                if !state.timer_running {
                    return Ok(Effect::cancel(CancelId::new(CounterEffect::Timer)));
                }

                let tick = env.tick;
                Ok(Effect::stream(async_stream::stream! {
                    loop {
                        tokio::time::sleep(tick).await;
                        yield CounterAction::TimerTicked;
                    }
                })
                .cancellable(CancelId::new(CounterEffect::Timer), true))
            },
        }
    }
}
