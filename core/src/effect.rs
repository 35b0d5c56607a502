//! Effect descriptions.
//!
//! Effects describe side effects to be performed by the runtime. They are
//! values, not execution: a reducer returns an [`Effect`] and the store runs
//! it only after the state produced by the same batch has been published.
//!
//! Three shapes produce actions:
//!
//! - [`Effect::none`]: nothing to do
//! - [`Effect::future`] / [`Effect::send`]: a one-shot computation yielding at most one action
//! - [`Effect::stream`] / [`Effect::run`]: a lazily produced, possibly infinite sequence
//!
//! Everything else is composition: [`Effect::map`], [`Effect::merge`],
//! [`Effect::chain`], [`Effect::deferred`], [`Effect::cancellable`],
//! [`Effect::debounce`], and the static [`Effect::cancel`] /
//! [`Effect::cancel_all`].

use crate::cancellation::CancelId;
use crate::error::{BoxError, EffectError};
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One-shot effect work
pub type ActionFuture<A> = BoxFuture<'static, Result<Option<A>, EffectError>>;

/// Streaming effect work
pub type ActionStream<A> = BoxStream<'static, Result<A, EffectError>>;

type Mapper<A, B> = Arc<dyn Fn(A) -> Option<B> + Send + Sync>;

/// Effect type - describes a side effect to be executed
///
/// # Type Parameters
///
/// - `Action`: The action type that effects can produce (feedback loop)
pub enum Effect<Action> {
    /// No-op effect
    None,

    /// Arbitrary async computation
    ///
    /// Resolves to `Some(action)` to feed an action back, `None` to finish silently.
    Future(ActionFuture<Action>),

    /// Sequence of actions, forwarded in emission order until it ends or is cancelled
    Stream(ActionStream<Action>),

    /// Run effects concurrently; finishes once every child has finished
    Parallel(Vec<Effect<Action>>),

    /// Run effects one after another
    Sequential(Vec<Effect<Action>>),

    /// Start the inner effect after a delay
    Delay {
        /// How long to wait
        duration: Duration,
        /// Effect started once the delay elapsed
        effect: Box<Effect<Action>>,
    },

    /// Register the inner effect under an id so it can be cancelled
    Cancellable {
        /// Identifier to register under
        id: CancelId,
        /// Cancel executions already running under `id` before starting
        cancel_in_flight: bool,
        /// The effect being made cancellable
        effect: Box<Effect<Action>>,
    },

    /// Cancel every execution registered under the id
    Cancel(CancelId),

    /// Cancel every registered execution
    CancelAll,
}

// Manual Debug implementation since Future doesn't implement Debug
impl<Action> std::fmt::Debug for Effect<Action> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            Effect::Stream(_) => write!(f, "Effect::Stream(<stream>)"),
            Effect::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
            Effect::Sequential(effects) => {
                f.debug_tuple("Effect::Sequential").field(effects).finish()
            },
            Effect::Delay { duration, effect } => f
                .debug_struct("Effect::Delay")
                .field("duration", duration)
                .field("effect", effect)
                .finish(),
            Effect::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => f
                .debug_struct("Effect::Cancellable")
                .field("id", id)
                .field("cancel_in_flight", cancel_in_flight)
                .field("effect", effect)
                .finish(),
            Effect::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
            Effect::CancelAll => write!(f, "Effect::CancelAll"),
        }
    }
}

impl<Action> Default for Effect<Action> {
    fn default() -> Self {
        Self::None
    }
}

impl<Action> Effect<Action> {
    /// An effect that does nothing
    #[must_use]
    pub const fn none() -> Self {
        Self::None
    }

    /// Whether this effect does nothing
    #[must_use]
    pub fn is_none(&self) -> bool {
        match self {
            Self::None => true,
            Self::Parallel(effects) | Self::Sequential(effects) => {
                effects.iter().all(Effect::is_none)
            },
            _ => false,
        }
    }

    /// Cancel every execution registered under `id`. Yields no action.
    #[must_use]
    pub fn cancel(id: impl Into<CancelId>) -> Self {
        Self::Cancel(id.into())
    }

    /// Cancel every registered execution. Yields no action.
    #[must_use]
    pub const fn cancel_all() -> Self {
        Self::CancelAll
    }

    /// Run this effect and `other` concurrently.
    ///
    /// Actions from both are forwarded in arrival order; the merged effect
    /// finishes only when both have finished.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::None, effect) | (effect, Self::None) => effect,
            (Self::Parallel(mut effects), other) => {
                effects.push(other);
                Self::Parallel(effects)
            },
            (effect, other) => Self::Parallel(vec![effect, other]),
        }
    }

    /// Merge any number of effects, dropping no-ops
    #[must_use]
    pub fn merge_all(effects: impl IntoIterator<Item = Self>) -> Self {
        let mut effects: Vec<Self> = effects
            .into_iter()
            .filter(|e| !matches!(e, Self::None))
            .collect();
        match effects.len() {
            0 => Self::None,
            1 => effects.pop().unwrap_or_default(),
            _ => Self::Parallel(effects),
        }
    }

    /// Run effects one after another; each starts when the previous finished
    #[must_use]
    pub fn chain(effects: impl IntoIterator<Item = Self>) -> Self {
        let mut effects: Vec<Self> = effects
            .into_iter()
            .filter(|e| !matches!(e, Self::None))
            .collect();
        match effects.len() {
            0 => Self::None,
            1 => effects.pop().unwrap_or_default(),
            _ => Self::Sequential(effects),
        }
    }

    /// Start this effect only after `duration` has elapsed
    #[must_use]
    pub fn deferred(self, duration: Duration) -> Self {
        if matches!(self, Self::None) {
            return self;
        }
        Self::Delay {
            duration,
            effect: Box::new(self),
        }
    }

    /// Register this effect under `id` when it starts.
    ///
    /// With `cancel_in_flight`, executions already running under `id` are
    /// cancelled first, so at most one execution per id is ever running.
    #[must_use]
    pub fn cancellable(self, id: impl Into<CancelId>, cancel_in_flight: bool) -> Self {
        if matches!(self, Self::None) {
            return self;
        }
        Self::Cancellable {
            id: id.into(),
            cancel_in_flight,
            effect: Box::new(self),
        }
    }

    /// Delay this effect by `duration`, pre-empting any earlier invocation
    /// with the same `id` that is still waiting or running.
    ///
    /// Within a burst of invocations spaced closer than `duration`, only
    /// the last one ever executes.
    #[must_use]
    pub fn debounce(self, id: impl Into<CancelId>, duration: Duration) -> Self {
        if matches!(self, Self::None) {
            return self;
        }
        self.deferred(duration).cancellable(id, true)
    }
}

impl<Action> Effect<Action>
where
    Action: Send + 'static,
{
    /// Yield exactly one action
    #[must_use]
    pub fn send(action: Action) -> Self {
        Self::Future(futures::future::ready(Ok(Some(action))).boxed())
    }

    /// Yield `action` after `duration`
    #[must_use]
    pub fn delayed(duration: Duration, action: Action) -> Self {
        Self::send(action).deferred(duration)
    }

    /// Await a computation and feed back its action, if any
    #[must_use]
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Option<Action>> + Send + 'static,
    {
        Self::Future(future.map(Ok).boxed())
    }

    /// Await a fallible computation.
    ///
    /// An `Err` is reported to the store's failure handler.
    #[must_use]
    pub fn try_future<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<Option<Action>, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Future(future.map(|result| result.map_err(EffectError::new)).boxed())
    }

    /// Forward every action of `stream`
    #[must_use]
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Action> + Send + 'static,
    {
        Self::Stream(stream.map(Ok).boxed())
    }

    /// Forward every item of a fallible stream.
    ///
    /// Each `Err` item is reported to the store's failure handler.
    #[must_use]
    pub fn try_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Action, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Stream(stream.map(|item| item.map_err(EffectError::new)).boxed())
    }

    /// Run an async closure that may send any number of actions.
    ///
    /// The effect finishes when the closure's future resolves and every
    /// action it sent has been forwarded.
    ///
    /// # Example
    ///
    /// ```
    /// use ripple_core::Effect;
    ///
    /// #[derive(Debug)]
    /// enum Action {
    ///     Progress(u8),
    /// }
    ///
    /// let effect: Effect<Action> = Effect::run(|send| async move {
    ///     for step in [25, 50, 100] {
    ///         send.send(Action::Progress(step));
    ///     }
    ///     Ok::<_, std::io::Error>(())
    /// });
    /// assert!(!effect.is_none());
    /// ```
    #[must_use]
    pub fn run<F, Fut, E>(work: F) -> Self
    where
        F: FnOnce(ActionSender<Action>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let (tx, rx) = mpsc::unbounded();
        let work = work(ActionSender { tx })
            .map(|result| result.err().map(|error| Err(EffectError::new(error))))
            .into_stream()
            .filter_map(futures::future::ready);
        Self::Stream(stream::select(rx, work).boxed())
    }

    /// Transform every yielded action
    #[must_use]
    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(Action) -> B + Send + Sync + 'static,
    {
        self.filter_map(move |action| Some(f(action)))
    }

    /// Transform every yielded action, dropping those mapped to `None`
    #[must_use]
    pub fn filter_map<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(Action) -> Option<B> + Send + Sync + 'static,
    {
        self.map_shared(Arc::new(f))
    }

    fn map_shared<B>(self, f: Mapper<Action, B>) -> Effect<B>
    where
        B: Send + 'static,
    {
        match self {
            Effect::None => Effect::None,
            Effect::Future(future) => Effect::Future(
                future
                    .map(move |result| result.map(|action| action.and_then(|a| f(a))))
                    .boxed(),
            ),
            Effect::Stream(stream) => Effect::Stream(
                stream
                    .filter_map(move |item| {
                        let mapped = match item {
                            Ok(action) => f(action).map(Ok),
                            Err(error) => Some(Err(error)),
                        };
                        futures::future::ready(mapped)
                    })
                    .boxed(),
            ),
            Effect::Parallel(effects) => Effect::Parallel(
                effects
                    .into_iter()
                    .map(|effect| effect.map_shared(Arc::clone(&f)))
                    .collect(),
            ),
            Effect::Sequential(effects) => Effect::Sequential(
                effects
                    .into_iter()
                    .map(|effect| effect.map_shared(Arc::clone(&f)))
                    .collect(),
            ),
            Effect::Delay { duration, effect } => Effect::Delay {
                duration,
                effect: Box::new(effect.map_shared(f)),
            },
            Effect::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => Effect::Cancellable {
                id,
                cancel_in_flight,
                effect: Box::new(effect.map_shared(f)),
            },
            Effect::Cancel(id) => Effect::Cancel(id),
            Effect::CancelAll => Effect::CancelAll,
        }
    }
}

/// Sending half handed to [`Effect::run`] closures.
#[derive(Debug)]
pub struct ActionSender<Action> {
    tx: mpsc::UnboundedSender<Result<Action, EffectError>>,
}

impl<Action> Clone for ActionSender<Action> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<Action> ActionSender<Action> {
    /// Feed an action back into the store.
    ///
    /// Returns `false` once the effect has been cancelled or dropped.
    pub fn send(&self, action: Action) -> bool {
        self.tx.unbounded_send(Ok(action)).is_ok()
    }

    /// Report a failure without ending the effect
    pub fn fail(&self, error: impl Into<BoxError>) -> bool {
        self.tx.unbounded_send(Err(EffectError::new(error))).is_ok()
    }

    /// Whether the receiving effect is gone (finished or cancelled)
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        Value(i32),
    }

    async fn collect_future(effect: Effect<i32>) -> Vec<i32> {
        match effect {
            Effect::Future(future) => future.await.ok().flatten().into_iter().collect(),
            Effect::Stream(stream) => stream.filter_map(|r| async move { r.ok() }).collect().await,
            _ => Vec::new(),
        }
    }

    #[test]
    fn none_is_none() {
        assert!(Effect::<Action>::none().is_none());
        assert!(Effect::<Action>::merge_all([Effect::none(), Effect::none()]).is_none());
        assert!(!Effect::send(Action::Value(1)).is_none());
    }

    #[test]
    fn merge_flattens_and_drops_noops() {
        let merged = Effect::send(1).merge(Effect::none());
        assert!(matches!(merged, Effect::Future(_)));

        let merged = Effect::send(1).merge(Effect::send(2)).merge(Effect::send(3));
        match merged {
            Effect::Parallel(effects) => assert_eq!(effects.len(), 3),
            other => panic!("expected parallel, got {other:?}"),
        }
    }

    #[test]
    fn chain_keeps_order() {
        let chained = Effect::chain([Effect::send(1), Effect::none(), Effect::send(2)]);
        match chained {
            Effect::Sequential(effects) => assert_eq!(effects.len(), 2),
            other => panic!("expected sequential, got {other:?}"),
        }
    }

    #[test]
    fn map_transforms_future_output() {
        let effect = Effect::send(20).map(|n| n + 1);
        assert_eq!(block_on(collect_future(effect)), vec![21]);
    }

    #[test]
    fn filter_map_drops_none() {
        let effect = Effect::stream(stream::iter(1..=6)).filter_map(|n| (n % 2 == 0).then_some(n));
        assert_eq!(block_on(collect_future(effect)), vec![2, 4, 6]);
    }

    #[test]
    fn map_preserves_structure() {
        let effect = Effect::send(1)
            .debounce("typing", Duration::from_millis(300))
            .map(Action::Value);
        match effect {
            Effect::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => {
                assert_eq!(id, CancelId::from("typing"));
                assert!(cancel_in_flight);
                assert!(matches!(
                    *effect,
                    Effect::Delay { duration, .. } if duration == Duration::from_millis(300)
                ));
            },
            other => panic!("expected cancellable, got {other:?}"),
        }
    }

    #[test]
    fn combinators_on_none_stay_none() {
        let effect = Effect::<i32>::none()
            .deferred(Duration::from_secs(1))
            .cancellable("x", true)
            .debounce("y", Duration::from_secs(1));
        assert!(matches!(effect, Effect::None));
    }

    #[test]
    fn try_future_wraps_errors() {
        let effect: Effect<i32> =
            Effect::try_future(async { Err::<Option<i32>, _>(std::io::Error::other("boom")) });
        match effect {
            Effect::Future(future) => {
                let result = block_on(future);
                assert!(result.is_err_and(|e| e.to_string().contains("boom")));
            },
            other => panic!("expected future, got {other:?}"),
        }
    }

    #[test]
    fn run_forwards_sent_actions_then_errors() {
        let effect: Effect<i32> = Effect::run(|send| async move {
            send.send(1);
            send.send(2);
            Err(std::io::Error::other("late failure"))
        });
        let Effect::Stream(stream) = effect else {
            panic!("expected stream");
        };
        let items: Vec<Result<i32, EffectError>> = block_on(stream.collect());
        let values: Vec<i32> = items.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(items.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[test]
    fn debug_output_names_variants() {
        let effect = Effect::<i32>::cancel("poll").merge(Effect::cancel_all());
        let rendered = format!("{effect:?}");
        assert!(rendered.contains("Effect::Cancel"));
        assert!(rendered.contains("Effect::CancelAll"));
    }
}
