//! The Store - runtime coordinator for a reducer
//!
//! A store owns the canonical state and is the only place it changes. All
//! reduce work happens on one writer task fed by an unbounded channel:
//! caller sends and actions produced by effects queue up there and are
//! reduced strictly one batch at a time.
//!
//! For every batch the writer:
//!
//! 1. reduces each action in order against a working copy of the state
//! 2. publishes the resulting state once
//! 3. merges the batch's effects into one execution and spawns it
//!
//! Each execution runs on its own task. Actions it yields are sent back to
//! the writer as single-action batches, and the execution waits for the
//! writer to acknowledge each one before pulling the next.
//!
//! Failures are judged per merged branch. A branch whose failure is
//! rethrown stops; its siblings keep running and the execution reports the
//! failure once they are done.

use crate::error::StoreError;
use crate::executor;
use crate::failure::{Failure, FailureHandler, RethrowFailures};
use crate::subscription::Subscription;
use futures::stream::{self, BoxStream};
use futures::{future, FutureExt, StreamExt};
use ripple_core::{CancellationRegistry, Effect, Reducer};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use ripple_runtime::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_action_broadcast_capacity(256)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.action_broadcast_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the broadcast channel behind [`Store::subscribe_actions`]
    pub action_broadcast_capacity: usize,
    /// Timeout used by [`Store::graceful_shutdown`]
    pub shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(action_broadcast_capacity: usize, shutdown_timeout: Duration) -> Self {
        Self {
            action_broadcast_capacity,
            shutdown_timeout,
        }
    }

    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_action_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.action_broadcast_capacity = capacity;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            action_broadcast_capacity: 16,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Identifier of one effect execution (one per batch that produced work)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(u64);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of an effect execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Spawned, not yet polled
    Pending,
    /// Polled at least once: cancellations have fired and cancellable
    /// effects have registered
    Running,
    /// Ran to completion, was cancelled, or was aborted
    Finished,
    /// Stopped by an unhandled failure
    Failed(String),
    /// The effect panicked
    Panicked(String),
}

impl ExecutionStatus {
    /// Whether the execution is over
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// A running effect execution, as reported by [`Store::running_effects`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectInfo {
    /// Execution identifier
    pub id: ExecutionId,
    /// Debug rendering of the batch that started the execution
    pub cause: String,
}

impl fmt::Display for EffectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} started by {}", self.id, self.cause)
    }
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send`]. Tracks the single execution that runs the
/// merged effects of the batch; follow-up effects started by actions that
/// execution feeds back are tracked by their own handles.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Start).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    id: Option<ExecutionId>,
    status: watch::Receiver<ExecutionStatus>,
}

impl EffectHandle {
    /// Create a handle that's already complete
    ///
    /// Returned for batches that produced no effect.
    #[must_use]
    pub fn completed() -> Self {
        let (_tx, status) = watch::channel(ExecutionStatus::Finished);
        Self { id: None, status }
    }

    /// The execution this handle tracks, if the batch produced any effect
    #[must_use]
    pub const fn id(&self) -> Option<ExecutionId> {
        self.id
    }

    /// Current status of the execution
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.status.borrow().clone()
    }

    /// Whether the execution is over
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    /// Wait until the execution has been polled once.
    ///
    /// After this returns, `cancel` effects of the batch have fired and its
    /// cancellable effects are registered.
    pub async fn started(&mut self) {
        let _ = self
            .status
            .wait_for(|status| *status != ExecutionStatus::Pending)
            .await;
    }

    /// Wait for the execution to finish
    ///
    /// # Errors
    ///
    /// - [`StoreError::EffectFailed`] if an unhandled failure stopped the execution
    /// - [`StoreError::EffectPanicked`] if the effect panicked
    pub async fn wait(&mut self) -> Result<(), StoreError> {
        let finished = self
            .status
            .wait_for(ExecutionStatus::is_terminal)
            .await
            .map(|status| status.clone())
            .ok();
        let status = finished.unwrap_or_else(|| self.status.borrow().clone());

        match status {
            ExecutionStatus::Failed(message) => Err(StoreError::EffectFailed(message)),
            ExecutionStatus::Panicked(message) => Err(StoreError::EffectPanicked(message)),
            _ => Ok(()),
        }
    }

    /// Wait for the execution to finish with a timeout
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the timeout expires first, or any
    /// error from [`EffectHandle::wait`].
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("id", &self.id)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

struct RunningEffect {
    cause: String,
    abort: tokio::task::AbortHandle,
}

/// Table of running executions shared by a store, its writer and its drivers
struct Executions {
    running: Mutex<HashMap<ExecutionId, RunningEffect>>,
    count: watch::Sender<usize>,
    next_id: AtomicU64,
}

impl Executions {
    fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            running: Mutex::new(HashMap::new()),
            count,
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ExecutionId, RunningEffect>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: ExecutionId) {
        let mut running = self.lock();
        running.remove(&id);
        self.publish_count(running.len());
    }

    fn publish_count(&self, running: usize) {
        metrics::gauge!("store.effects.running").set(running as f64);
        self.count.send_replace(running);
    }

    fn snapshot(&self) -> Vec<EffectInfo> {
        let mut effects: Vec<EffectInfo> = self
            .lock()
            .iter()
            .map(|(id, effect)| EffectInfo {
                id: *id,
                cause: effect.cause.clone(),
            })
            .collect();
        effects.sort_by_key(|effect| effect.id);
        effects
    }

    fn abort_all(&self) -> usize {
        let running = self.lock();
        for effect in running.values() {
            effect.abort.abort();
        }
        running.len()
    }
}

/// Removes an execution from the table and publishes its final status.
///
/// Runs on drop so that aborted executions are cleaned up too.
struct ExecutionGuard {
    id: ExecutionId,
    executions: Arc<Executions>,
    status: watch::Sender<ExecutionStatus>,
    outcome: Option<ExecutionStatus>,
}

impl ExecutionGuard {
    fn mark_running(&self) {
        self.status.send_replace(ExecutionStatus::Running);
    }

    fn finish(mut self, outcome: ExecutionStatus) {
        self.outcome = Some(outcome);
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(ExecutionStatus::Finished);
        match &outcome {
            ExecutionStatus::Failed(_) => metrics::counter!("store.effects.failed").increment(1),
            ExecutionStatus::Panicked(_) => {
                metrics::counter!("store.effects.panicked").increment(1);
            },
            _ => metrics::counter!("store.effects.completed").increment(1),
        }
        tracing::trace!(execution = %self.id, ?outcome, "Effect execution ended");

        // Leave the table before announcing the outcome.
        self.executions.remove(self.id);
        self.status.send_replace(outcome);
    }
}

#[derive(Debug, Clone, Copy)]
enum Origin {
    Caller,
    Effect(ExecutionId),
}

struct Envelope<A> {
    actions: Vec<A>,
    origin: Origin,
    reply: oneshot::Sender<Result<EffectHandle, StoreError>>,
}

/// Everything needed to start effect executions
struct EffectContext<A> {
    executions: Arc<Executions>,
    registry: CancellationRegistry,
    feedback: mpsc::WeakUnboundedSender<Envelope<A>>,
    failures: Arc<dyn FailureHandler>,
}

impl<A> Clone for EffectContext<A> {
    fn clone(&self) -> Self {
        Self {
            executions: Arc::clone(&self.executions),
            registry: self.registry.clone(),
            feedback: self.feedback.clone(),
            failures: Arc::clone(&self.failures),
        }
    }
}

impl<A> EffectContext<A>
where
    A: Send + 'static,
{
    fn launch(&self, effect: Effect<A>, cause: String) -> EffectHandle {
        let id = ExecutionId(self.executions.next_id.fetch_add(1, Ordering::Relaxed));
        let (status, observer) = watch::channel(ExecutionStatus::Pending);
        let guard = ExecutionGuard {
            id,
            executions: Arc::clone(&self.executions),
            status,
            outcome: None,
        };
        let mut branches = Vec::new();
        self.supervise(effect, &mut branches);
        let driver = drive(id, branches, self.feedback.clone(), guard);

        // Spawn under the lock so the task cannot leave the table before it
        // has been entered.
        let mut running = self.executions.lock();
        let task = tokio::spawn(driver);
        tracing::debug!(execution = %id, cause = %cause, "Starting effect execution");
        running.insert(
            id,
            RunningEffect {
                cause,
                abort: task.abort_handle(),
            },
        );
        self.executions.publish_count(running.len());
        drop(running);

        metrics::counter!("store.effects.started").increment(1);
        EffectHandle {
            id: Some(id),
            status: observer,
        }
    }

    /// Interpret `effect` into `branches`, one per merged effect, each with
    /// its own failure scope
    fn supervise(&self, effect: Effect<A>, branches: &mut Vec<SupervisedStream<A>>) {
        match effect {
            Effect::Parallel(effects) => {
                for effect in effects {
                    self.supervise(effect, branches);
                }
            },
            effect => branches.push(supervised(
                executor::into_stream(effect, &self.registry),
                Arc::clone(&self.failures),
            )),
        }
    }
}

/// Actions of a running execution, with failures already judged by the
/// failure handler. An `Err` is the last item of its branch.
type SupervisedStream<A> = BoxStream<'static, Result<A, Failure>>;

fn supervised<A>(
    actions: executor::EffectStream<A>,
    failures: Arc<dyn FailureHandler>,
) -> SupervisedStream<A>
where
    A: Send + 'static,
{
    stream::unfold(Some(actions), move |branch| {
        let failures = Arc::clone(&failures);
        async move {
            let mut actions = branch?;
            loop {
                match actions.next().await? {
                    Ok(action) => return Some((Ok(action), Some(actions))),
                    Err(error) => {
                        let failure = Failure::Effect(error);
                        if failures.handle(&failure) {
                            metrics::counter!("store.failures.handled", "kind" => "effect")
                                .increment(1);
                            continue;
                        }
                        metrics::counter!("store.failures.unhandled", "kind" => "effect")
                            .increment(1);
                        // Dropping the branch releases its registrations.
                        return Some((Err(failure), None));
                    },
                }
            }
        }
    })
    .boxed()
}

async fn drive<A>(
    id: ExecutionId,
    branches: Vec<SupervisedStream<A>>,
    feedback: mpsc::WeakUnboundedSender<Envelope<A>>,
    guard: ExecutionGuard,
) where
    A: Send + 'static,
{
    let mut actions: SupervisedStream<A> = stream::empty().boxed();
    let outcome = AssertUnwindSafe(async {
        actions = start(branches).await;
        guard.mark_running();
        pump(id, &mut actions, &feedback).await
    })
    .catch_unwind()
    .await;

    let status = outcome.unwrap_or_else(|panic| {
        let message = panic_message(panic.as_ref());
        tracing::error!(execution = %id, panic = %message, "Effect panicked");
        ExecutionStatus::Panicked(message)
    });

    // Release the effect's resources (and its cancellation registration)
    // before reporting the outcome.
    drop(actions);
    guard.finish(status);
}

/// Poll every branch once, then merge them.
///
/// The first poll fires cancellations and registers cancellable effects, so
/// once this returns the whole execution has started.
async fn start<A>(branches: Vec<SupervisedStream<A>>) -> SupervisedStream<A>
where
    A: Send + 'static,
{
    let mut started = Vec::with_capacity(branches.len());
    for mut branch in branches {
        match futures::poll!(branch.next()) {
            Poll::Ready(None) => {},
            Poll::Ready(Some(first)) => {
                started.push(stream::once(future::ready(first)).chain(branch).boxed());
            },
            Poll::Pending => started.push(branch),
        }
    }
    stream::select_all(started).boxed()
}

async fn pump<A>(
    id: ExecutionId,
    actions: &mut SupervisedStream<A>,
    feedback: &mpsc::WeakUnboundedSender<Envelope<A>>,
) -> ExecutionStatus
where
    A: Send + 'static,
{
    let mut failed = None;
    while let Some(item) = actions.next().await {
        match item {
            Ok(action) => {
                let Some(commands) = feedback.upgrade() else {
                    tracing::trace!(execution = %id, "Store dropped, stopping effect");
                    return ExecutionStatus::Finished;
                };
                let (reply, ack) = oneshot::channel();
                let envelope = Envelope {
                    actions: vec![action],
                    origin: Origin::Effect(id),
                    reply,
                };
                if commands.send(envelope).is_err() {
                    return ExecutionStatus::Finished;
                }
                drop(commands);

                // Wait until the writer has reduced the action before pulling
                // the next one.
                match ack.await {
                    Ok(Ok(_follow_up)) => {},
                    Ok(Err(error)) => {
                        tracing::error!(
                            execution = %id,
                            error = %error,
                            "Action fed back by effect failed"
                        );
                        return ExecutionStatus::Failed(error.to_string());
                    },
                    Err(_) => return ExecutionStatus::Finished,
                }
            },
            Err(failure) => {
                tracing::debug!(
                    execution = %id,
                    error = %failure,
                    "Effect branch stopped by failure"
                );
                failed.get_or_insert_with(|| failure.to_string());
            },
        }
    }

    failed.map_or(ExecutionStatus::Finished, ExecutionStatus::Failed)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// The single writer: owns the reducer, the environment and the state sender
struct Writer<R>
where
    R: Reducer,
{
    reducer: R,
    environment: R::Environment,
    state: watch::Sender<R::State>,
    actions: broadcast::Sender<R::Action>,
    effects: EffectContext<R::Action>,
}

impl<R> Writer<R>
where
    R: Reducer,
    R::State: Clone,
    R::Action: Clone + fmt::Debug + Send + 'static,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Envelope<R::Action>>) {
        while let Some(envelope) = commands.recv().await {
            let result = self.process(envelope.actions, envelope.origin);
            let _ = envelope.reply.send(result);
        }

        let aborted = self.effects.executions.abort_all();
        tracing::debug!(aborted, "All store handles dropped, writer stopped");
    }

    fn process(
        &mut self,
        actions: Vec<R::Action>,
        origin: Origin,
    ) -> Result<EffectHandle, StoreError> {
        if actions.is_empty() {
            return Ok(EffectHandle::completed());
        }

        let count = actions.len();
        let cause = format!("{actions:?}");
        let mut working = self.state.borrow().clone();
        let mut effects = Vec::with_capacity(count);

        for action in actions {
            if let Origin::Effect(_) = origin {
                // Broadcast to observers
                let _ = self.actions.send(action.clone());
            }

            // Reduce on a copy so a failing reducer leaves no partial writes.
            let mut next = working.clone();
            let start = std::time::Instant::now();
            let result = self.reducer.reduce(&mut next, action, &self.environment);
            metrics::histogram!("store.reducer.duration_seconds")
                .record(start.elapsed().as_secs_f64());

            match result {
                Ok(effect) => {
                    working = next;
                    effects.push(effect);
                },
                Err(error) => {
                    let failure = Failure::Reducer(error);
                    if self.effects.failures.handle(&failure) {
                        metrics::counter!("store.failures.handled", "kind" => "reducer")
                            .increment(1);
                        continue;
                    }
                    metrics::counter!("store.failures.unhandled", "kind" => "reducer").increment(1);
                    return Err(failure.into());
                },
            }
        }

        metrics::counter!("store.actions.total").increment(count as u64);
        metrics::counter!("store.batches.total").increment(1);

        self.state.send_replace(working);
        tracing::debug!(actions = count, ?origin, "Reduced batch and published state");

        let effect = Effect::merge_all(effects);
        if effect.is_none() {
            return Ok(EffectHandle::completed());
        }
        Ok(self.effects.launch(effect, cause))
    }
}

struct Shared<S, A> {
    commands: mpsc::UnboundedSender<Envelope<A>>,
    state: watch::Receiver<S>,
    actions: broadcast::Sender<A>,
    executions: Arc<Executions>,
    registry: CancellationRegistry,
    shutdown: AtomicBool,
    config: StoreConfig,
}

/// The Store - runtime coordinator for a reducer
///
/// The reducer and environment move into the store's writer task, so the
/// handle is typed only by state and action. Cloning is cheap and every
/// clone talks to the same writer. The writer stops, and every running
/// effect is aborted, once the last handle is dropped.
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
///
/// # Example
///
/// ```ignore
/// let store = Store::new(CounterState::default(), CounterReducer, CounterEnvironment::default());
///
/// store.send(CounterAction::Increment).await?;
/// assert_eq!(store.state(|s| s.count), 1);
/// ```
pub struct Store<S, A> {
    shared: Arc<Shared<S, A>>,
}

impl<S, A> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, A> fmt::Debug for Store<S, A>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.shared.state.borrow())
            .field("running_effects", &*self.shared.executions.count.borrow())
            .field("registry", &self.shared.registry)
            .finish_non_exhaustive()
    }
}

impl<S, A> Store<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Clone + fmt::Debug + Send + 'static,
{
    /// Create a new store with initial state, reducer, and environment
    ///
    /// Uses [`StoreConfig::default`], [`RethrowFailures`] and a fresh
    /// [`CancellationRegistry`]. Use [`Store::builder`] for anything else.
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
        Self::start(
            initial_state,
            reducer,
            environment,
            StoreConfig::default(),
            Arc::new(RethrowFailures),
            CancellationRegistry::new(),
        )
        .0
    }

    /// Start configuring a store
    #[must_use]
    pub fn builder<R>(initial_state: S, reducer: R, environment: R::Environment) -> StoreBuilder<R>
    where
        R: Reducer<State = S, Action = A> + Send + 'static,
        R::Environment: Send + 'static,
    {
        StoreBuilder {
            state: initial_state,
            reducer,
            environment,
            config: StoreConfig::default(),
            failures: Arc::new(RethrowFailures),
            registry: CancellationRegistry::new(),
            subscriptions: Vec::new(),
        }
    }

    fn start<R>(
        initial_state: S,
        reducer: R,
        environment: R::Environment,
        config: StoreConfig,
        failures: Arc<dyn FailureHandler>,
        registry: CancellationRegistry,
    ) -> (Self, EffectContext<A>)
    where
        R: Reducer<State = S, Action = A> + Send + 'static,
        R::Environment: Send + 'static,
    {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial_state);
        let (actions, _) = broadcast::channel(config.action_broadcast_capacity.max(1));
        let executions = Arc::new(Executions::new());

        let effects = EffectContext {
            executions: Arc::clone(&executions),
            registry: registry.clone(),
            feedback: commands.downgrade(),
            failures,
        };

        let writer = Writer {
            reducer,
            environment,
            state: state_tx,
            actions: actions.clone(),
            effects: effects.clone(),
        };
        tokio::spawn(writer.run(inbox));

        let store = Self {
            shared: Arc::new(Shared {
                commands,
                state: state_rx,
                actions,
                executions,
                registry,
                shutdown: AtomicBool::new(false),
                config,
            }),
        };
        (store, effects)
    }

    /// Send an action to the store
    ///
    /// Shorthand for [`Store::send_all`] with a single action.
    ///
    /// # Errors
    ///
    /// See [`Store::send_all`].
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        self.send_all([action]).await
    }

    /// Send a batch of actions to the store
    ///
    /// All actions are reduced in order before the resulting state is
    /// published, and the state is published exactly once. The batch's
    /// effects start only after that. An empty batch does nothing.
    ///
    /// Returns once the batch has been reduced, with an [`EffectHandle`]
    /// tracking the batch's effects.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
    /// - [`StoreError::Reducer`] if the reducer failed and the failure
    ///   handler rethrew; nothing from the batch is published
    /// - [`StoreError::ChannelClosed`] if the writer has stopped
    #[tracing::instrument(skip(self, actions), name = "store_send_all")]
    pub async fn send_all(
        &self,
        actions: impl IntoIterator<Item = A>,
    ) -> Result<EffectHandle, StoreError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            tracing::warn!("Rejected action: store is shutting down");
            metrics::counter!("store.shutdown.rejected_actions").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }

        let actions: Vec<A> = actions.into_iter().collect();
        if actions.is_empty() {
            return Ok(EffectHandle::completed());
        }

        tracing::debug!(actions = actions.len(), "Processing batch");
        let (reply, response) = oneshot::channel();
        self.shared
            .commands
            .send(Envelope {
                actions,
                origin: Origin::Caller,
                reply,
            })
            .map_err(|_| StoreError::ChannelClosed)?;

        response.await.map_err(|_| StoreError::ChannelClosed)?
    }

    /// Send an action and wait for a matching result action
    ///
    /// Subscribes to the action broadcast before sending, then returns the
    /// first action produced by an effect that matches `predicate`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`]: Timeout expired before matching action received
    /// - [`StoreError::ChannelClosed`]: Action broadcast channel closed
    /// - any error from [`Store::send`]
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = store
    ///     .send_and_wait_for(
    ///         Action::Load { id },
    ///         |a| matches!(a, Action::Loaded { .. } | Action::LoadFailed { .. }),
    ///         Duration::from_secs(10),
    ///     )
    ///     .await?;
    /// ```
    pub async fn send_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        // Subscribe BEFORE sending to avoid race condition
        let mut rx = self.shared.actions.subscribe();

        self.send(action).await?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            skipped,
                            "Action observer lagged, {} actions skipped",
                            skipped
                        );
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    },
                }
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Subscribe to every action produced by effects
    ///
    /// Actions sent by callers are not broadcast.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.shared.actions.subscribe()
    }

    /// Read current state via a closure
    ///
    /// ```ignore
    /// let count = store.state(|s| s.count);
    /// ```
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        f(&self.shared.state.borrow())
    }

    /// Clone of the most recently published state
    #[must_use]
    pub fn current_state(&self) -> S {
        self.shared.state.borrow().clone()
    }

    /// Stream of published states, starting with the current one.
    ///
    /// Consecutive equal states are emitted once.
    #[must_use]
    pub fn observe(&self) -> BoxStream<'static, S>
    where
        S: PartialEq,
    {
        distinct(self.published())
    }

    /// Every publish, without duplicate suppression. Intermediate states
    /// may be skipped by slow consumers.
    pub(crate) fn published(&self) -> BoxStream<'static, S> {
        let mut rx = self.shared.state.clone();
        async_stream::stream! {
            loop {
                let state = rx.borrow_and_update().clone();
                yield state;
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        .boxed()
    }

    /// Executions started by this store that have not finished yet
    #[must_use]
    pub fn running_effects(&self) -> Vec<EffectInfo> {
        self.shared.executions.snapshot()
    }

    /// Watch the number of running executions
    #[must_use]
    pub fn watch_running_effects(&self) -> watch::Receiver<usize> {
        self.shared.executions.count.subscribe()
    }

    /// Abort every running execution. Returns how many were running.
    pub fn abort_running_effects(&self) -> usize {
        let aborted = self.shared.executions.abort_all();
        if aborted > 0 {
            tracing::debug!(aborted, "Aborted running effects");
        }
        aborted
    }

    /// The cancellation registry this store's effects register with
    #[must_use]
    pub fn registry(&self) -> &CancellationRegistry {
        &self.shared.registry
    }

    /// Gracefully shut down using [`StoreConfig::shutdown_timeout`]
    ///
    /// # Errors
    ///
    /// See [`Store::shutdown`].
    pub async fn graceful_shutdown(&self) -> Result<(), StoreError> {
        self.shutdown(self.shared.config.shutdown_timeout).await
    }

    /// Gracefully shut down the store
    ///
    /// New caller sends are rejected from now on; actions fed back by
    /// running effects are still reduced. Waits until no execution is
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
    /// when the timeout expires.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!("Initiating graceful shutdown");
        metrics::counter!("store.shutdown.initiated").increment(1);

        self.shared.shutdown.store(true, Ordering::Release);

        let mut running = self.watch_running_effects();
        let drained = tokio::time::timeout(timeout, running.wait_for(|count| *count == 0))
            .await
            .is_ok();

        if drained {
            tracing::info!("All effects completed, shutdown successful");
            metrics::counter!("store.shutdown.completed").increment(1);
            Ok(())
        } else {
            let pending = *running.borrow();
            tracing::error!(
                pending_effects = pending,
                "Shutdown timeout: {} effects still running",
                pending
            );
            metrics::counter!("store.shutdown.timeout").increment(1);
            Err(StoreError::ShutdownTimeout(pending))
        }
    }

    /// Whether [`Store::shutdown`] has been called
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

/// Suppress consecutive duplicates
pub(crate) fn distinct<S>(states: BoxStream<'static, S>) -> BoxStream<'static, S>
where
    S: Clone + PartialEq + Send + 'static,
{
    let mut last: Option<S> = None;
    states
        .filter(move |state| {
            let changed = last.as_ref() != Some(state);
            if changed {
                last = Some(state.clone());
            }
            futures::future::ready(changed)
        })
        .boxed()
}

/// Builder for [`Store`]
///
/// # Example
///
/// ```ignore
/// let store = Store::builder(AppState::default(), AppReducer, env)
///     .with_config(StoreConfig::default().with_action_broadcast_capacity(64))
///     .with_failure_handler(SwallowFailures)
///     .with_registry(shared_registry.clone())
///     .with_subscription(|env: &AppEnv| Ok(Effect::stream(env.clock.ticks())))
///     .build()?;
/// ```
pub struct StoreBuilder<R>
where
    R: Reducer,
{
    state: R::State,
    reducer: R,
    environment: R::Environment,
    config: StoreConfig,
    failures: Arc<dyn FailureHandler>,
    registry: CancellationRegistry,
    subscriptions: Vec<Box<dyn Subscription<R::Environment, R::Action>>>,
}

impl<R> StoreBuilder<R>
where
    R: Reducer + Send + 'static,
    R::State: Clone + Send + Sync + 'static,
    R::Action: Clone + fmt::Debug + Send + 'static,
    R::Environment: Send + 'static,
{
    /// Use a custom configuration
    #[must_use]
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Route failures through `handler` instead of [`RethrowFailures`]
    #[must_use]
    pub fn with_failure_handler(mut self, handler: impl FailureHandler + 'static) -> Self {
        self.failures = Arc::new(handler);
        self
    }

    /// Register effects with an existing registry, shared with other stores
    #[must_use]
    pub fn with_registry(mut self, registry: CancellationRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Start `subscription` when the store is built
    #[must_use]
    pub fn with_subscription(
        mut self,
        subscription: impl Subscription<R::Environment, R::Action> + 'static,
    ) -> Self {
        self.subscriptions.push(Box::new(subscription));
        self
    }

    /// Build the store and start its subscriptions
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SubscriptionFailed`] when a subscription fails
    /// to start and the failure handler rethrows.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn build(self) -> Result<Store<R::State, R::Action>, StoreError> {
        let Self {
            state,
            reducer,
            environment,
            config,
            failures,
            registry,
            subscriptions,
        } = self;

        let mut started = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            match subscription.subscribe(&environment) {
                Ok(effect) => started.push(effect),
                Err(error) => {
                    let failure = Failure::Subscription(error);
                    if failures.handle(&failure) {
                        metrics::counter!("store.failures.handled", "kind" => "subscription")
                            .increment(1);
                        continue;
                    }
                    return Err(failure.into());
                },
            }
        }

        let (store, effects) =
            Store::start(state, reducer, environment, config, failures, registry);
        for effect in started {
            if !effect.is_none() {
                let _ = effects.launch(effect, "subscription".to_string());
            }
        }
        Ok(store)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use ripple_core::{from_fn, ReducerError};

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Counter {
        value: i64,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum Action {
        Add(i64),
        AddLater(i64),
        Fail,
        Panic,
    }

    fn reducer() -> impl Reducer<State = Counter, Action = Action, Environment = ()> + Send {
        from_fn(|state: &mut Counter, action: Action, _env: &()| match action {
            Action::Add(n) => {
                state.value += n;
                Ok(Effect::none())
            },
            Action::AddLater(n) => Ok(Effect::delayed(Duration::from_millis(10), Action::Add(n))),
            Action::Fail => {
                state.value = -1;
                Err(ReducerError::failed("refused"))
            },
            Action::Panic => Ok(Effect::future(async { panic!("effect blew up") })),
        })
    }

    #[test]
    fn config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.action_broadcast_capacity, 16);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn execution_status_terminal_states() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Finished.is_terminal());
        assert!(ExecutionStatus::Failed("x".into()).is_terminal());
    }

    #[tokio::test]
    async fn completed_handle_is_finished() {
        let mut handle = EffectHandle::completed();
        assert!(handle.is_finished());
        assert!(handle.id().is_none());
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn unhandled_reducer_failure_publishes_nothing() {
        let store = Store::new(Counter::default(), reducer(), ());

        let result = store.send_all([Action::Add(5), Action::Fail]).await;
        assert!(matches!(result, Err(StoreError::Reducer(_))));
        assert_eq!(store.state(|s| s.value), 0);
    }

    #[tokio::test]
    async fn handled_reducer_failure_keeps_pre_failure_state() {
        let store = Store::builder(Counter::default(), reducer(), ())
            .with_failure_handler(crate::SwallowFailures)
            .build()
            .unwrap();

        let result = store.send_all([Action::Add(5), Action::Fail, Action::Add(1)]).await;
        assert!(result.is_ok());
        assert_eq!(store.state(|s| s.value), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn effect_handle_tracks_execution() {
        let store = Store::new(Counter::default(), reducer(), ());

        let mut handle = store.send(Action::AddLater(3)).await.unwrap();
        assert!(handle.id().is_some());
        assert_eq!(store.running_effects().len(), 1);
        assert!(store.running_effects()[0].cause.contains("AddLater(3)"));

        handle.wait().await.unwrap();
        assert_eq!(store.state(|s| s.value), 3);
        assert!(store.running_effects().is_empty());
    }

    #[tokio::test]
    async fn panicking_effect_is_reported() {
        let store = Store::new(Counter::default(), reducer(), ());

        let mut handle = store.send(Action::Panic).await.unwrap();
        let result = handle.wait().await;
        assert!(matches!(
            result,
            Err(StoreError::EffectPanicked(ref m)) if m.contains("effect blew up")
        ));
        assert!(store.running_effects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_running_effects_finishes_handles() {
        let store = Store::new(Counter::default(), reducer(), ());
        let mut handle = store.send(Action::AddLater(1)).await.unwrap();

        assert_eq!(store.abort_running_effects(), 1);
        handle.wait().await.unwrap();
        assert_eq!(store.state(|s| s.value), 0);
    }
}
