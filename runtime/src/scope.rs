//! Scoped views of a store.
//!
//! A [`ScopedStore`] exposes part of a parent store's state and accepts a
//! local action type. It owns nothing: reads go through the parent's
//! published state and sends are embedded into parent actions, so a view
//! always agrees with its parent and sending through it is exactly a parent
//! send of the embedded action.

use crate::error::StoreError;
use crate::store::{distinct, EffectHandle, Store};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::fmt;
use std::sync::Arc;

type Read<S> = Arc<dyn Fn() -> S + Send + Sync>;
type Changes<S> = Arc<dyn Fn() -> BoxStream<'static, S> + Send + Sync>;
type Sink<A> =
    Arc<dyn Fn(Vec<A>) -> BoxFuture<'static, Result<EffectHandle, StoreError>> + Send + Sync>;

/// A projection of a store onto local state `S` and local actions `A`
///
/// Created with [`Store::view`], [`Store::optional_view`] or
/// [`ScopedStore::view`].
///
/// # Example
///
/// ```ignore
/// let counter = app_store.view(|app: &AppState| app.counter.clone(), AppAction::Counter);
///
/// counter.send(CounterAction::Increment).await?;
/// assert_eq!(counter.state(|c| c.count), app_store.state(|app| app.counter.count));
/// ```
pub struct ScopedStore<S, A> {
    read: Read<S>,
    changes: Changes<S>,
    sink: Sink<A>,
}

impl<S, A> Clone for ScopedStore<S, A> {
    fn clone(&self) -> Self {
        Self {
            read: Arc::clone(&self.read),
            changes: Arc::clone(&self.changes),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S, A> fmt::Debug for ScopedStore<S, A>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedStore")
            .field("state", &(self.read)())
            .finish_non_exhaustive()
    }
}

impl<S, A> ScopedStore<S, A>
where
    S: Send + 'static,
    A: Send + 'static,
{
    /// Read the local state via a closure
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        f(&(self.read)())
    }

    /// The local state, derived from the parent's current state
    #[must_use]
    pub fn current_state(&self) -> S {
        (self.read)()
    }

    /// Stream of local states, one per distinct change
    ///
    /// Parent publishes that leave the local state equal are not emitted.
    #[must_use]
    pub fn observe(&self) -> BoxStream<'static, S>
    where
        S: Clone + PartialEq,
    {
        distinct((self.changes)())
    }

    /// Send a local action through the parent
    ///
    /// # Errors
    ///
    /// Any error the parent's send returns, or
    /// [`StoreError::StateUnavailable`] for optional views whose state is
    /// absent.
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        (self.sink)(vec![action]).await
    }

    /// Send a batch of local actions through the parent as one batch
    ///
    /// # Errors
    ///
    /// See [`ScopedStore::send`].
    pub async fn send_all(
        &self,
        actions: impl IntoIterator<Item = A>,
    ) -> Result<EffectHandle, StoreError> {
        (self.sink)(actions.into_iter().collect()).await
    }

    /// Scope this view further
    #[must_use]
    pub fn view<LS, LA>(
        &self,
        to_local: impl Fn(&S) -> LS + Send + Sync + 'static,
        embed: impl Fn(LA) -> A + Send + Sync + 'static,
    ) -> ScopedStore<LS, LA>
    where
        LS: Send + 'static,
        LA: Send + 'static,
    {
        let to_local = Arc::new(to_local);

        let read = {
            let parent = Arc::clone(&self.read);
            let to_local = Arc::clone(&to_local);
            Arc::new(move || to_local(&parent()))
        };

        let changes = {
            let parent = Arc::clone(&self.changes);
            Arc::new(move || {
                let to_local = Arc::clone(&to_local);
                parent().map(move |state| to_local(&state)).boxed()
            })
        };

        let sink = {
            let parent = Arc::clone(&self.sink);
            Arc::new(move |actions: Vec<LA>| parent(actions.into_iter().map(&embed).collect()))
        };

        ScopedStore { read, changes, sink }
    }
}

impl<S, A> ScopedStore<Option<S>, A>
where
    S: Send + 'static,
    A: Send + 'static,
{
    /// Reject sends while the local state is absent
    fn gated(self) -> Self {
        let Self { read, changes, sink } = self;
        let present = Arc::clone(&read);
        let sink: Sink<A> = Arc::new(move |actions: Vec<A>| {
            if present().is_none() {
                tracing::warn!(actions = actions.len(), "Rejected send: scoped state is absent");
                return futures::future::ready(Err(StoreError::StateUnavailable)).boxed();
            }
            sink(actions)
        });
        Self { read, changes, sink }
    }
}

impl<S, A> Store<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Clone + fmt::Debug + Send + 'static,
{
    /// The whole store as a [`ScopedStore`]
    #[must_use]
    pub fn scoped(&self) -> ScopedStore<S, A> {
        let read = {
            let store = self.clone();
            Arc::new(move || store.current_state())
        };
        let changes = {
            let store = self.clone();
            Arc::new(move || store.published())
        };
        let sink = {
            let store = self.clone();
            Arc::new(move |actions: Vec<A>| {
                let store = store.clone();
                async move { store.send_all(actions).await }.boxed()
            })
        };
        ScopedStore { read, changes, sink }
    }

    /// A view of this store's state through `to_local`, accepting local
    /// actions that `embed` lifts into this store's actions
    ///
    /// # Example
    ///
    /// ```ignore
    /// let todos = store.view(|app: &AppState| app.todos.clone(), AppAction::Todos);
    /// todos.send(TodosAction::Add("milk".into())).await?;
    /// ```
    #[must_use]
    pub fn view<LS, LA>(
        &self,
        to_local: impl Fn(&S) -> LS + Send + Sync + 'static,
        embed: impl Fn(LA) -> A + Send + Sync + 'static,
    ) -> ScopedStore<LS, LA>
    where
        LS: Send + 'static,
        LA: Send + 'static,
    {
        self.scoped().view(to_local, embed)
    }

    /// Like [`Store::view`] for state that may be absent
    ///
    /// The view's state is `None` while the part is absent, and sends made
    /// then are rejected with [`StoreError::StateUnavailable`]. Presence is
    /// checked when the send is issued.
    #[must_use]
    pub fn optional_view<LS, LA>(
        &self,
        to_local: impl Fn(&S) -> Option<LS> + Send + Sync + 'static,
        embed: impl Fn(LA) -> A + Send + Sync + 'static,
    ) -> ScopedStore<Option<LS>, LA>
    where
        LS: Send + 'static,
        LA: Send + 'static,
    {
        self.view(to_local, embed).gated()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ripple_core::{from_fn, Effect, Reducer};
    use std::time::Duration;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct App {
        counter: i32,
        label: String,
        detail: Option<i32>,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum AppAction {
        Counter(CounterAction),
        Rename(String),
        Open,
        Detail(i32),
    }

    #[derive(Clone, Debug, PartialEq)]
    enum CounterAction {
        Increment,
    }

    fn reducer() -> impl Reducer<State = App, Action = AppAction, Environment = ()> + Send {
        from_fn(|state: &mut App, action: AppAction, _env: &()| {
            match action {
                AppAction::Counter(CounterAction::Increment) => state.counter += 1,
                AppAction::Rename(label) => state.label = label,
                AppAction::Open => state.detail = Some(0),
                AppAction::Detail(delta) => {
                    if let Some(detail) = state.detail.as_mut() {
                        *detail += delta;
                    }
                },
            }
            Ok(Effect::none())
        })
    }

    #[tokio::test]
    async fn view_reads_and_sends_through_parent() {
        let store = Store::new(App::default(), reducer(), ());
        let counter = store.view(|app: &App| app.counter, AppAction::Counter);

        counter.send(CounterAction::Increment).await.unwrap();
        counter.send_all([CounterAction::Increment, CounterAction::Increment]).await.unwrap();

        assert_eq!(counter.current_state(), 3);
        assert_eq!(store.state(|app| app.counter), 3);
    }

    #[tokio::test]
    async fn view_observe_skips_unrelated_changes() {
        let store = Store::new(App::default(), reducer(), ());
        let counter = store.view(|app: &App| app.counter, AppAction::Counter);
        let mut changes = counter.observe();

        assert_eq!(changes.next().await, Some(0));

        store.send(AppAction::Rename("a".into())).await.unwrap();
        store.send(AppAction::Counter(CounterAction::Increment)).await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(next, Some(1));
    }

    #[tokio::test]
    async fn nested_views_compose() {
        let store = Store::new(App::default(), reducer(), ());
        let outer =
            store.view(|app: &App| (app.counter, app.label.clone()), |action: AppAction| action);
        let inner = outer.view(|(count, _): &(i32, String)| *count, AppAction::Counter);

        inner.send(CounterAction::Increment).await.unwrap();
        assert_eq!(inner.current_state(), 1);
        assert_eq!(outer.state(|(count, _)| *count), 1);
    }

    #[tokio::test]
    async fn optional_view_rejects_sends_while_absent() {
        let store = Store::new(App::default(), reducer(), ());
        let detail = store.optional_view(|app: &App| app.detail, AppAction::Detail);

        assert_eq!(detail.current_state(), None);
        let rejected = detail.send(5).await;
        assert!(matches!(rejected, Err(StoreError::StateUnavailable)));

        store.send(AppAction::Open).await.unwrap();
        detail.send(5).await.unwrap();
        assert_eq!(detail.current_state(), Some(5));
    }
}
