//! Effect interpretation.
//!
//! [`into_stream`] turns an [`Effect`] description into a single stream of
//! actions. Nothing happens until the stream is polled: timers start,
//! cancellable effects register, and `cancel` effects fire on first poll.
//! The store polls each batch's stream from its own task.

use futures::future;
use futures::stream::{self, Abortable, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use ripple_core::cancellation::RegistrationGuard;
use ripple_core::{CancellationRegistry, Effect, EffectError};

/// Stream of actions (or effect failures) produced by a running effect
pub type EffectStream<A> = BoxStream<'static, Result<A, EffectError>>;

/// Interpret `effect` against `registry`.
///
/// - `Parallel` children are polled together and their actions forwarded in
///   arrival order; the stream ends when every child has ended.
/// - `Sequential` children start one after another.
/// - `Cancellable` registers under its id on first poll and ends quietly
///   when cancelled.
/// - `Cancel` / `CancelAll` act on first poll and yield nothing.
pub fn into_stream<A>(effect: Effect<A>, registry: &CancellationRegistry) -> EffectStream<A>
where
    A: Send + 'static,
{
    match effect {
        Effect::None => stream::empty().boxed(),
        Effect::Future(work) => work
            .into_stream()
            .filter_map(|result| future::ready(result.transpose()))
            .boxed(),
        Effect::Stream(actions) => actions,
        Effect::Parallel(effects) => {
            stream::select_all(effects.into_iter().map(|effect| into_stream(effect, registry)))
                .boxed()
        },
        Effect::Sequential(effects) => {
            let registry = registry.clone();
            stream::iter(effects)
                .map(move |effect| into_stream(effect, &registry))
                .flatten()
                .boxed()
        },
        Effect::Delay { duration, effect } => {
            let registry = registry.clone();
            stream::once(async move {
                tokio::time::sleep(duration).await;
                into_stream(*effect, &registry)
            })
            .flatten()
            .boxed()
        },
        Effect::Cancellable {
            id,
            cancel_in_flight,
            effect,
        } => {
            let registry = registry.clone();
            stream::once(async move {
                let registration = registry.register(&id, cancel_in_flight);
                tracing::trace!(?id, cancel_in_flight, "Registered cancellable effect");
                let (abort, guard) = registration.into_parts();
                let inner = into_stream(*effect, &registry);
                match abort {
                    Some(abort) => guarded(Abortable::new(inner, abort), guard),
                    None => stream::empty().boxed(),
                }
            })
            .flatten()
            .boxed()
        },
        Effect::Cancel(id) => {
            let registry = registry.clone();
            stream::once(async move {
                let cancelled = registry.cancel(&id);
                tracing::debug!(?id, cancelled, "Cancelled effects");
                metrics::counter!("store.effects.cancelled").increment(cancelled as u64);
                None::<Result<A, EffectError>>
            })
            .filter_map(future::ready)
            .boxed()
        },
        Effect::CancelAll => {
            let registry = registry.clone();
            stream::once(async move {
                let cancelled = registry.cancel_all();
                tracing::debug!(cancelled, "Cancelled all effects");
                metrics::counter!("store.effects.cancelled").increment(cancelled as u64);
                None::<Result<A, EffectError>>
            })
            .filter_map(future::ready)
            .boxed()
        },
    }
}

/// Run `effect` to completion and collect every action it yields.
///
/// # Errors
///
/// Returns the first [`EffectError`] the effect raises.
pub async fn collect<A>(
    effect: Effect<A>,
    registry: &CancellationRegistry,
) -> Result<Vec<A>, EffectError>
where
    A: Send + 'static,
{
    let mut actions = Vec::new();
    let mut stream = into_stream(effect, registry);
    while let Some(item) = stream.next().await {
        actions.push(item?);
    }
    Ok(actions)
}

// Keeps the registration alive until the inner stream ends or is dropped.
fn guarded<A, S>(inner: S, guard: RegistrationGuard) -> EffectStream<A>
where
    A: Send + 'static,
    S: Stream<Item = Result<A, EffectError>> + Send + Unpin + 'static,
{
    stream::unfold((inner, guard), |(mut inner, guard)| async move {
        inner.next().await.map(|item| (item, (inner, guard)))
    })
    .boxed()
}
