//! Exhaustive, step-by-step store testing.
//!
//! [`TestStore`] runs a reducer inside a real [`Store`] and records every
//! reduction. Tests then walk through what happened:
//!
//! - [`TestStore::send`] sends an action and asserts how the state changed
//! - [`TestStore::receive`] asserts the next action an effect fed back, and
//!   the state change it caused
//! - [`TestStore::finish`] fails if received actions were left unasserted or
//!   effects are still running
//!
//! With [`Exhaustivity::On`] (the default) every state change must be
//! described and every received action asserted, in order. With
//! [`Exhaustivity::Off`] only the fields a step's update touches are
//! checked, received actions may be skipped, and `send` quietly drains
//! whatever was received before it.
//!
//! Receives and `finish` wait at most [`DEFAULT_TIMEOUT`] of real time.
//! Under a paused Tokio clock, virtual time jumps ahead to the next pending
//! timer whenever the harness is waiting, so delayed and debounced effects
//! deliver without manual [`TestStore::advance`] calls.

use crate::diff::{render_changes, FieldChange, StateDiff};
use ripple_core::{CancellationRegistry, ReduceResult, Reducer};
use ripple_runtime::{EffectHandle, Failure, Store, StoreError};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

/// How long `receive` and `finish` wait, in real time
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// An action tagged with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestAction<A> {
    /// Sent by the test
    Sent(A),
    /// Fed back by an effect
    Received(A),
}

impl<A> TestAction<A> {
    /// The wrapped action
    #[must_use]
    pub fn into_inner(self) -> A {
        match self {
            Self::Sent(action) | Self::Received(action) => action,
        }
    }

    /// The wrapped action
    #[must_use]
    pub const fn as_inner(&self) -> &A {
        match self {
            Self::Sent(action) | Self::Received(action) => action,
        }
    }

    /// Whether an effect produced the action
    #[must_use]
    pub const fn is_received(&self) -> bool {
        matches!(self, Self::Received(_))
    }
}

/// How strict a [`TestStore`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exhaustivity {
    /// Every state change and every received action must be asserted
    #[default]
    On,
    /// Only asserted fields are checked; received actions may be skipped
    Off {
        /// Log what was skipped at `info` level
        log_skipped: bool,
    },
}

/// Assertion failures raised by [`TestStore`]
#[derive(Error, Debug)]
pub enum TestStoreError {
    /// The store rejected a sent action
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The state after a step differs from what the test described
    #[error("state after {step} does not match expectation:\n{}", render_changes(.changes))]
    StateMismatch {
        /// The step being asserted
        step: String,
        /// Fields whose values differ
        changes: Vec<FieldChange>,
    },

    /// The next received action is not the expected one
    #[error("expected to receive {expected}, but received {received}")]
    UnexpectedAction {
        /// What the test expected
        expected: String,
        /// What the effect actually fed back
        received: String,
    },

    /// No matching action arrived in time
    #[error(
        "timed out after {timeout:?} waiting to receive {expected}; in-flight effects: {}",
        render_list(.in_flight)
    )]
    ReceiveTimeout {
        /// What the test expected
        expected: String,
        /// How long the harness waited
        timeout: Duration,
        /// Effects still running at the time
        in_flight: Vec<String>,
    },

    /// Nothing matching was received and no effect is left to deliver it
    #[error("expected to receive {expected}, but no effects are running")]
    NothingToReceive {
        /// What the test expected
        expected: String,
    },

    /// Received actions were left unasserted
    #[error("received actions must be asserted before {context}: {}", render_list(.actions))]
    UnhandledReceivedActions {
        /// What the test tried to do next
        context: String,
        /// The unasserted actions, oldest first
        actions: Vec<String>,
    },

    /// Effects were still running when the test finished
    #[error("effects still running at finish: {}", render_list(.0))]
    InFlightEffects(Vec<String>),

    /// Effects or received actions failed
    #[error("effects failed: {}", render_list(.0))]
    EffectFailures(Vec<String>),

    /// In-flight effects did not stop after being aborted
    #[error("in-flight effects did not stop within {0:?}")]
    Timeout(Duration),
}

fn render_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Update closure for steps that leave the state unchanged
///
/// ```ignore
/// store.send(Action::Noop, unchanged).await?;
/// ```
pub const fn unchanged<S>(_state: &mut S) {}

struct Step<S, A> {
    action: A,
    after: S,
}

struct Log<S, A> {
    sent: Mutex<VecDeque<Step<S, A>>>,
    received: Mutex<VecDeque<Step<S, A>>>,
    failures: Mutex<Vec<String>>,
    arrivals: watch::Sender<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records every reduction and tags effect output as received
struct Instrumented<R>
where
    R: Reducer,
{
    inner: R,
    log: Arc<Log<R::State, R::Action>>,
}

impl<R> Reducer for Instrumented<R>
where
    R: Reducer,
    R::State: Clone,
    R::Action: Clone + fmt::Debug + Send + 'static,
{
    type State = R::State;
    type Action = TestAction<R::Action>;
    type Environment = R::Environment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> ReduceResult<Self::Action> {
        let received = action.is_received();
        let action = action.into_inner();

        let effect = match self.inner.reduce(state, action.clone(), env) {
            Ok(effect) => effect,
            Err(error) => {
                if received {
                    lock(&self.log.failures).push(format!("{action:?}: {error}"));
                }
                return Err(error);
            },
        };

        let step = Step {
            action,
            after: state.clone(),
        };
        if received {
            lock(&self.log.received).push_back(step);
            self.log.arrivals.send_modify(|count| *count += 1);
        } else {
            lock(&self.log.sent).push_back(step);
        }

        Ok(effect.map(TestAction::Received))
    }
}

/// Run `work` for at most `timeout` of real time.
///
/// The deadline lives on a plain OS thread the runtime does not know about.
/// A paused Tokio clock keeps auto-advancing while `work` waits, and the
/// deadline keeps ticking.
async fn within<T>(timeout: Duration, work: impl Future<Output = T>) -> Option<T> {
    let (cancel, cancelled) = std::sync::mpsc::channel::<()>();
    let (expire, expired) = oneshot::channel::<()>();
    std::thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
            let _ = expire.send(());
        }
    });

    let outcome = tokio::select! {
        biased;
        value = work => Some(value),
        _ = expired => None,
    };
    drop(cancel);
    outcome
}

/// Test harness around a [`Store`]
///
/// # Example
///
/// ```ignore
/// let mut store = TestStore::new(AppState::default(), AppReducer, AppEnvironment::test());
///
/// store.send(AppAction::Tap, |s| s.loading = true).await?;
/// store.receive(AppAction::Loaded(69), |s| {
///     s.loading = false;
///     s.value = 69;
/// }).await?;
///
/// store.finish().await?;
/// ```
pub struct TestStore<S, A> {
    store: Store<S, TestAction<A>>,
    log: Arc<Log<S, A>>,
    expected: S,
    exhaustivity: Exhaustivity,
    timeout: Duration,
    finished: bool,
}

impl<S, A> TestStore<S, A>
where
    S: StateDiff + Clone + fmt::Debug + Send + Sync + 'static,
    A: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    /// Create a harness running `reducer` from `initial_state`
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new<R>(initial_state: S, reducer: R, environment: R::Environment) -> Self
    where
        R: Reducer<State = S, Action = A> + Send + 'static,
        R::Environment: Send + 'static,
    {
        Self::with_registry(initial_state, reducer, environment, CancellationRegistry::new())
    }

    /// Create a harness whose effects register with `registry`
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_registry<R>(
        initial_state: S,
        reducer: R,
        environment: R::Environment,
        registry: CancellationRegistry,
    ) -> Self
    where
        R: Reducer<State = S, Action = A> + Send + 'static,
        R::Environment: Send + 'static,
    {
        let (arrivals, _) = watch::channel(0);
        let log = Arc::new(Log {
            sent: Mutex::new(VecDeque::new()),
            received: Mutex::new(VecDeque::new()),
            failures: Mutex::new(Vec::new()),
            arrivals,
        });

        let failures = Arc::clone(&log);
        let store = Store::builder(
            initial_state.clone(),
            Instrumented {
                inner: reducer,
                log: Arc::clone(&log),
            },
            environment,
        )
        .with_registry(registry)
        .with_failure_handler(move |failure: &Failure| {
            if let Failure::Effect(error) = failure {
                lock(&failures.failures).push(error.to_string());
            }
            false
        })
        .build()
        .expect("a store without subscriptions always builds");

        Self {
            store,
            log,
            expected: initial_state,
            exhaustivity: Exhaustivity::default(),
            timeout: DEFAULT_TIMEOUT,
            finished: false,
        }
    }

    /// Change how long receives and `finish` wait
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Change how strict the harness is
    #[must_use]
    pub const fn with_exhaustivity(mut self, exhaustivity: Exhaustivity) -> Self {
        self.exhaustivity = exhaustivity;
        self
    }

    /// The current exhaustivity
    #[must_use]
    pub const fn exhaustivity(&self) -> Exhaustivity {
        self.exhaustivity
    }

    /// The store's current state
    #[must_use]
    pub fn state(&self) -> S {
        self.store.current_state()
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &Store<S, TestAction<A>> {
        &self.store
    }

    /// Send `action` and assert the state it produces.
    ///
    /// `update` receives the expected state before the action and must turn
    /// it into the expected state after it. Returns once the action's effect
    /// has started, so its cancellations have fired and its cancellable
    /// effects are registered.
    ///
    /// # Errors
    ///
    /// - [`TestStoreError::UnhandledReceivedActions`] in exhaustive mode if
    ///   received actions were not asserted yet
    /// - [`TestStoreError::StateMismatch`] if the state differs
    /// - [`TestStoreError::Store`] if the store rejected the action
    pub async fn send<F>(&mut self, action: A, update: F) -> Result<EffectHandle, TestStoreError>
    where
        F: FnMut(&mut S),
    {
        self.check_failures()?;
        let description = format!("{action:?}");

        match self.exhaustivity {
            Exhaustivity::On => {
                let pending = self.pending_received();
                if !pending.is_empty() {
                    return Err(TestStoreError::UnhandledReceivedActions {
                        context: format!("sending {description}"),
                        actions: pending,
                    });
                }
            },
            Exhaustivity::Off { log_skipped } => {
                self.drain_received(log_skipped);
            },
        }

        let mut handle = self.store.send(TestAction::Sent(action)).await?;
        handle.started().await;
        let Some(step) = lock(&self.log.sent).pop_front() else {
            return Err(StoreError::ChannelClosed.into());
        };

        self.assert_step(&description, update, step.after)?;
        Ok(handle)
    }

    /// Assert that the next received action equals `expected`, and the
    /// state change it caused.
    ///
    /// # Errors
    ///
    /// - [`TestStoreError::UnexpectedAction`] in exhaustive mode if another
    ///   action was received first
    /// - [`TestStoreError::ReceiveTimeout`] if nothing matching arrives
    /// - [`TestStoreError::NothingToReceive`] if nothing matching was
    ///   received and no effect is running any more
    /// - [`TestStoreError::StateMismatch`] if the state differs
    pub async fn receive<F>(&mut self, expected: A, update: F) -> Result<(), TestStoreError>
    where
        F: FnMut(&mut S),
    {
        let description = format!("{expected:?}");
        self.receive_step(&description, &|action: &A| *action == expected, update)
            .await
    }

    /// Like [`TestStore::receive`], matching with a predicate
    ///
    /// # Errors
    ///
    /// See [`TestStore::receive`].
    pub async fn receive_matching<P, F>(
        &mut self,
        description: &str,
        predicate: P,
        update: F,
    ) -> Result<(), TestStoreError>
    where
        P: Fn(&A) -> bool,
        F: FnMut(&mut S),
    {
        self.receive_step(description, &predicate, update).await
    }

    /// Assert the current state without sending anything.
    ///
    /// In exhaustive mode every received action must have been asserted
    /// first; in non-exhaustive mode their changes are folded in.
    ///
    /// # Errors
    ///
    /// - [`TestStoreError::UnhandledReceivedActions`] in exhaustive mode if
    ///   received actions were not asserted yet
    /// - [`TestStoreError::StateMismatch`] if the state differs
    pub fn assert_state<F>(&mut self, update: F) -> Result<(), TestStoreError>
    where
        F: FnMut(&mut S),
    {
        if self.exhaustivity == Exhaustivity::On {
            let pending = self.pending_received();
            if !pending.is_empty() {
                return Err(TestStoreError::UnhandledReceivedActions {
                    context: "asserting state".to_string(),
                    actions: pending,
                });
            }
        }
        let actual = self.store.current_state();
        self.assert_step("assert_state", update, actual)
    }

    /// Discard every received action not asserted yet.
    ///
    /// Returns how many were skipped.
    pub fn skip_received_actions(&mut self) -> usize {
        self.drain_received(true)
    }

    /// Abort every running effect and wait until they have stopped.
    ///
    /// Returns how many were running.
    ///
    /// # Errors
    ///
    /// [`TestStoreError::Timeout`] if they do not stop in time.
    pub async fn skip_in_flight_effects(&mut self) -> Result<usize, TestStoreError> {
        let running = self.store.running_effects();
        for effect in &running {
            tracing::info!(effect = %effect, "Skipping in-flight effect");
        }

        self.store.abort_running_effects();
        let mut count = self.store.watch_running_effects();
        let stopped = within(self.timeout, async { count.wait_for(|n| *n == 0).await.is_ok() })
            .await
            .unwrap_or(false);

        if stopped {
            Ok(running.len())
        } else {
            Err(TestStoreError::Timeout(self.timeout))
        }
    }

    /// Move the paused Tokio clock forward
    ///
    /// # Panics
    ///
    /// Panics if the clock is not paused (use `#[tokio::test(start_paused = true)]`).
    pub async fn advance(&self, duration: Duration) {
        tokio::time::advance(duration).await;
    }

    /// Finish the test.
    ///
    /// Waits for running effects to end. In exhaustive mode, fails if
    /// received actions were not asserted or effects are still running. In
    /// non-exhaustive mode, effects still running are logged and aborted,
    /// and received actions are skipped.
    ///
    /// # Errors
    ///
    /// - [`TestStoreError::EffectFailures`] if an effect or a received action failed
    /// - [`TestStoreError::UnhandledReceivedActions`]
    /// - [`TestStoreError::InFlightEffects`]
    pub async fn finish(mut self) -> Result<(), TestStoreError> {
        self.finished = true;

        let mut count = self.store.watch_running_effects();
        let settled = within(self.timeout, async {
            count.wait_for(|n| *n == 0).await.is_ok()
        })
        .await
        .unwrap_or(false);

        match self.exhaustivity {
            Exhaustivity::On => {
                self.check_failures()?;

                let pending = self.pending_received();
                if !pending.is_empty() {
                    return Err(TestStoreError::UnhandledReceivedActions {
                        context: "finishing".to_string(),
                        actions: pending,
                    });
                }

                if !settled {
                    let running = self
                        .store
                        .running_effects()
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    return Err(TestStoreError::InFlightEffects(running));
                }
            },
            Exhaustivity::Off { log_skipped } => {
                if !settled {
                    for effect in self.store.running_effects() {
                        tracing::warn!(
                            effect = %effect,
                            "Effect still running at finish, aborting"
                        );
                    }
                    self.store.abort_running_effects();
                }
                self.check_failures()?;
                self.drain_received(log_skipped);
            },
        }

        Ok(())
    }

    async fn receive_step<P, F>(
        &mut self,
        description: &str,
        predicate: &P,
        update: F,
    ) -> Result<(), TestStoreError>
    where
        P: Fn(&A) -> bool,
        F: FnMut(&mut S),
    {
        self.check_failures()?;

        let timeout = self.timeout;
        let mut arrivals = self.log.arrivals.subscribe();
        let mut running = self.store.watch_running_effects();
        let found = within(timeout, async {
            loop {
                match self.take_matching(description, predicate) {
                    Ok(None) => {},
                    found => return found,
                }
                if *running.borrow_and_update() == 0 {
                    // An execution leaves the table only after everything it
                    // fed back was recorded, so this look is final.
                    return self.take_matching(description, predicate);
                }
                tokio::select! {
                    changed = arrivals.changed() => {
                        if changed.is_err() {
                            return Err(TestStoreError::Store(StoreError::ChannelClosed));
                        }
                    },
                    changed = running.changed() => {
                        if changed.is_err() {
                            return Err(TestStoreError::Store(StoreError::ChannelClosed));
                        }
                    },
                }
            }
        })
        .await;

        let step = match found {
            Some(Ok(Some(step))) => step,
            Some(Ok(None)) => {
                self.check_failures()?;
                return Err(TestStoreError::NothingToReceive {
                    expected: description.to_string(),
                });
            },
            Some(Err(error)) => return Err(error),
            None => {
                self.check_failures()?;
                return Err(TestStoreError::ReceiveTimeout {
                    expected: description.to_string(),
                    timeout,
                    in_flight: self
                        .store
                        .running_effects()
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                });
            },
        };

        self.assert_step(&format!("receiving {description}"), update, step.after)
    }

    fn take_matching<P>(
        &mut self,
        description: &str,
        predicate: &P,
    ) -> Result<Option<Step<S, A>>, TestStoreError>
    where
        P: Fn(&A) -> bool,
    {
        let mut received = lock(&self.log.received);
        match self.exhaustivity {
            Exhaustivity::On => {
                let Some(next) = received.front() else {
                    return Ok(None);
                };
                if predicate(&next.action) {
                    return Ok(received.pop_front());
                }
                Err(TestStoreError::UnexpectedAction {
                    expected: description.to_string(),
                    received: format!("{:?}", next.action),
                })
            },
            Exhaustivity::Off { log_skipped } => {
                let Some(position) = received.iter().position(|step| predicate(&step.action)) else {
                    return Ok(None);
                };
                let skipped: Vec<Step<S, A>> = received.drain(..position).collect();
                if log_skipped {
                    for step in &skipped {
                        tracing::info!(action = ?step.action, "Skipped received action");
                    }
                }
                if let Some(last) = skipped.last() {
                    self.expected = last.after.clone();
                }
                Ok(received.pop_front())
            },
        }
    }

    fn pending_received(&self) -> Vec<String> {
        lock(&self.log.received)
            .iter()
            .map(|step| format!("{:?}", step.action))
            .collect()
    }

    fn drain_received(&mut self, log_skipped: bool) -> usize {
        let skipped: Vec<Step<S, A>> = lock(&self.log.received).drain(..).collect();
        if log_skipped {
            for step in &skipped {
                tracing::info!(action = ?step.action, "Skipped received action");
            }
        }
        if let Some(last) = skipped.last() {
            self.expected = last.after.clone();
        }
        skipped.len()
    }

    fn check_failures(&self) -> Result<(), TestStoreError> {
        let failures = std::mem::take(&mut *lock(&self.log.failures));
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TestStoreError::EffectFailures(failures))
        }
    }

    fn assert_step<F>(&mut self, step: &str, mut update: F, actual: S) -> Result<(), TestStoreError>
    where
        F: FnMut(&mut S),
    {
        let mut expected = self.expected.clone();
        update(&mut expected);
        let mismatches = expected.diff(&actual);

        let failures = match self.exhaustivity {
            Exhaustivity::On => mismatches,
            Exhaustivity::Off { log_skipped } => {
                // A field is asserted when the update writes it, whether or
                // not the written value differs from the previous one.
                let mut rewritten = actual.clone();
                update(&mut rewritten);
                let touched: Vec<String> = self
                    .expected
                    .diff(&expected)
                    .into_iter()
                    .chain(actual.diff(&rewritten))
                    .map(|change| change.path)
                    .collect();
                let (asserted, skipped): (Vec<FieldChange>, Vec<FieldChange>) = mismatches
                    .into_iter()
                    .partition(|change| touched.contains(&change.path));
                if log_skipped && !skipped.is_empty() {
                    tracing::info!(
                        step,
                        "Skipped unasserted state changes:\n{}",
                        render_changes(&skipped)
                    );
                }
                asserted
            },
        };

        self.expected = actual;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TestStoreError::StateMismatch {
                step: step.to_string(),
                changes: failures,
            })
        }
    }
}

impl<S, A> Drop for TestStore<S, A> {
    fn drop(&mut self) {
        if !self.finished && !std::thread::panicking() {
            tracing::warn!(
                "TestStore dropped without finish(); received actions went unchecked"
            );
        }
    }
}

impl<S, A> fmt::Debug for TestStore<S, A>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestStore")
            .field("expected", &self.expected)
            .field("exhaustivity", &self.exhaustivity)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
