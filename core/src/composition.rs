//! Reducer composition utilities
//!
//! This module provides utilities for composing reducers in various ways:
//! - **`combine_reducers`**: Run multiple reducers on the same state/action, in order
//! - **`scope_reducer`**: Focus a reducer on a subset of state
//! - **`pullback`**: Lift a child reducer into a parent's state, action and environment
//! - **`optional_pullback`**: Same, for child state that may be absent
//! - **`for_each`**: Run an element reducer against one entry of a keyed collection
//!
//! Every combinator is a plain value built from the functions it is given.
//! None of them keep mutable bookkeeping of their own.
//!
//! # Examples
//!
//! ## Lifting a child reducer
//!
//! ```
//! use ripple_core::composition::{pullback, ActionPrism, StateLens};
//! use ripple_core::{from_fn, Effect, Reducer};
//!
//! #[derive(Clone, Debug, Default)]
//! struct AppState {
//!     clicks: u32,
//!     title: String,
//! }
//!
//! #[derive(Clone, Debug)]
//! enum AppAction {
//!     Click(()),
//!     Rename(String),
//! }
//!
//! let clicks = from_fn(|count: &mut u32, (): (), _env: &()| {
//!     *count += 1;
//!     Ok(Effect::none())
//! });
//!
//! let app = pullback(
//!     clicks,
//!     StateLens::new(|app: &AppState| app.clicks, |app: &mut AppState, n| app.clicks = n),
//!     ActionPrism::new(
//!         |action: AppAction| match action {
//!             AppAction::Click(click) => Some(click),
//!             AppAction::Rename(_) => None,
//!         },
//!         AppAction::Click,
//!     ),
//!     |env: &()| env,
//! );
//!
//! let mut state = AppState::default();
//! let _ = app.reduce(&mut state, AppAction::Click(()), &());
//! let _ = app.reduce(&mut state, AppAction::Rename("ignored".into()), &());
//! assert_eq!(state.clicks, 1);
//! ```

use crate::effect::Effect;
use crate::error::ReducerError;
use crate::reducer::{ReduceResult, Reducer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};

/// Combines multiple reducers that operate on the same state and action types.
///
/// Each child sees the state as left by the previous one. Their effects are
/// merged, so the asynchronous work of every child runs concurrently. The
/// first child to fail aborts the whole reduce call.
///
/// # Examples
///
/// ```
/// use ripple_core::composition::combine_reducers;
/// use ripple_core::{from_fn, Effect, Reducer};
///
/// #[derive(Clone, Debug)]
/// enum Action {
///     Add(i64),
/// }
///
/// #[derive(Default)]
/// struct Totals {
///     sum: i64,
///     doubled: i64,
/// }
///
/// let combined = combine_reducers(vec![
///     Box::new(from_fn(|s: &mut Totals, Action::Add(n): Action, _: &()| {
///         s.sum += n;
///         Ok(Effect::none())
///     })),
///     // Runs second and sees the updated sum.
///     Box::new(from_fn(|s: &mut Totals, _a: Action, _: &()| {
///         s.doubled = s.sum * 2;
///         Ok(Effect::none())
///     })),
/// ]);
///
/// let mut state = Totals::default();
/// let _ = combined.reduce(&mut state, Action::Add(4), &());
/// assert_eq!(state.doubled, 8);
/// ```
#[must_use]
pub fn combine_reducers<S, A, E>(
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>>,
) -> CombinedReducer<S, A, E>
where
    A: Clone,
{
    CombinedReducer { reducers }
}

/// A combined reducer that runs multiple reducers in sequence.
///
/// Created by [`combine_reducers`].
pub struct CombinedReducer<S, A, E> {
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>>,
}

impl<S, A, E> CombinedReducer<S, A, E> {
    /// Append another child; it runs after every existing one.
    #[must_use]
    pub fn with(
        mut self,
        reducer: impl Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    ) -> Self {
        self.reducers.push(Box::new(reducer));
        self
    }

    /// Number of child reducers
    #[must_use]
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Whether there are no child reducers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl<S, A, E> fmt::Debug for CombinedReducer<S, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinedReducer")
            .field("reducers", &self.reducers.len())
            .finish()
    }
}

impl<S, A, E> Reducer for CombinedReducer<S, A, E>
where
    A: Clone,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> ReduceResult<Self::Action> {
        let mut effects = Vec::with_capacity(self.reducers.len());
        for reducer in &self.reducers {
            effects.push(reducer.reduce(state, action.clone(), env)?);
        }
        Ok(Effect::merge_all(effects))
    }
}

/// Scopes a reducer to operate on a subset of a larger state.
///
/// The action and environment types are shared with the parent. Use
/// [`pullback`] when the child has its own action type.
///
/// # Examples
///
/// ```
/// use ripple_core::composition::scope_reducer;
/// use ripple_core::{from_fn, Effect, Reducer};
///
/// #[derive(Clone, Default)]
/// struct Volume {
///     level: u8,
/// }
///
/// #[derive(Default)]
/// struct Player {
///     volume: Volume,
///     track: String,
/// }
///
/// let louder = from_fn(|v: &mut Volume, step: u8, _: &()| {
///     v.level = v.level.saturating_add(step);
///     Ok(Effect::none())
/// });
///
/// let scoped = scope_reducer(
///     louder,
///     |player: &Player| &player.volume,
///     |player: &mut Player, volume: Volume| player.volume = volume,
/// );
///
/// let mut player = Player::default();
/// let _ = scoped.reduce(&mut player, 3, &());
/// assert_eq!(player.volume.level, 3);
/// ```
pub fn scope_reducer<S, R>(
    reducer: R,
    get_state: fn(&S) -> &R::State,
    set_state: fn(&mut S, R::State),
) -> ScopedReducer<S, R>
where
    R: Reducer,
    R::State: Clone,
{
    ScopedReducer {
        reducer,
        get_state,
        set_state,
    }
}

/// A scoped reducer that operates on a subset of state.
///
/// Created by [`scope_reducer`].
pub struct ScopedReducer<S, R>
where
    R: Reducer,
{
    reducer: R,
    get_state: fn(&S) -> &R::State,
    set_state: fn(&mut S, R::State),
}

impl<S, R> Reducer for ScopedReducer<S, R>
where
    R: Reducer,
    R::State: Clone,
{
    type State = S;
    type Action = R::Action;
    type Environment = R::Environment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> ReduceResult<Self::Action> {
        let mut sub_state = (self.get_state)(state).clone();
        let effect = self.reducer.reduce(&mut sub_state, action, env)?;
        (self.set_state)(state, sub_state);
        Ok(effect)
    }
}

/// A pair of pure functions between a parent state and a child state.
///
/// `get` extracts the child, `set` writes an updated child back. Law:
/// `set(g, l)` followed by `get(g)` yields `l`.
pub struct StateLens<G, L> {
    /// Extract the child state
    pub get: fn(&G) -> L,
    /// Write an updated child state back into the parent
    pub set: fn(&mut G, L),
}

impl<G, L> StateLens<G, L> {
    /// Build a lens from its two functions
    #[must_use]
    pub const fn new(get: fn(&G) -> L, set: fn(&mut G, L)) -> Self {
        Self { get, set }
    }
}

impl<G, L> Clone for StateLens<G, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G, L> Copy for StateLens<G, L> {}

/// Like [`StateLens`], for child state the parent does not always hold.
pub struct OptionalStateLens<G, L> {
    /// Extract the child state, if present
    pub get: fn(&G) -> Option<L>,
    /// Write an updated child state back into the parent
    pub set: fn(&mut G, L),
}

impl<G, L> OptionalStateLens<G, L> {
    /// Build a lens from its two functions
    #[must_use]
    pub const fn new(get: fn(&G) -> Option<L>, set: fn(&mut G, L)) -> Self {
        Self { get, set }
    }
}

impl<G, L> Clone for OptionalStateLens<G, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G, L> Copy for OptionalStateLens<G, L> {}

/// A pair of pure functions between a parent action and a child action.
///
/// `extract` returns `None` for parent actions with no child equivalent.
/// `embed` is total: every child action has a parent form.
pub struct ActionPrism<GA, LA> {
    /// Try to turn a parent action into a child action
    pub extract: fn(GA) -> Option<LA>,
    /// Wrap a child action as a parent action
    pub embed: fn(LA) -> GA,
}

impl<GA, LA> ActionPrism<GA, LA> {
    /// Build a prism from its two functions
    #[must_use]
    pub const fn new(extract: fn(GA) -> Option<LA>, embed: fn(LA) -> GA) -> Self {
        Self { extract, embed }
    }
}

impl<GA, LA> Clone for ActionPrism<GA, LA> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<GA, LA> Copy for ActionPrism<GA, LA> {}

/// Lift a reducer over `(LocalState, LocalAction, LocalEnvironment)` into one
/// over the parent's types.
///
/// Parent actions the prism cannot extract are a no-op. Otherwise the local
/// state is extracted, reduced, and written back, and every action the local
/// effect yields is embedded into the parent action type.
pub fn pullback<R, GS, GA, GE>(
    reducer: R,
    state: StateLens<GS, R::State>,
    action: ActionPrism<GA, R::Action>,
    environment: fn(&GE) -> &R::Environment,
) -> Pullback<R, GS, GA, GE>
where
    R: Reducer,
{
    Pullback {
        reducer,
        state,
        action,
        environment,
    }
}

/// Reducer returned by [`pullback`].
pub struct Pullback<R, GS, GA, GE>
where
    R: Reducer,
{
    reducer: R,
    state: StateLens<GS, R::State>,
    action: ActionPrism<GA, R::Action>,
    environment: fn(&GE) -> &R::Environment,
}

impl<R, GS, GA, GE> Reducer for Pullback<R, GS, GA, GE>
where
    R: Reducer,
    R::Action: Send + 'static,
    GA: Send + 'static,
{
    type State = GS;
    type Action = GA;
    type Environment = GE;

    fn reduce(&self, state: &mut GS, action: GA, env: &GE) -> ReduceResult<GA> {
        let Some(local_action) = (self.action.extract)(action) else {
            return Ok(Effect::none());
        };

        let mut local = (self.state.get)(state);
        let effect = self
            .reducer
            .reduce(&mut local, local_action, (self.environment)(env))?;
        (self.state.set)(state, local);

        Ok(effect.map(self.action.embed))
    }
}

/// Like [`pullback`], but the parent may currently hold no child state.
///
/// When either the child state or the child action is missing the reducer
/// does nothing and returns no effect.
pub fn optional_pullback<R, GS, GA, GE>(
    reducer: R,
    state: OptionalStateLens<GS, R::State>,
    action: ActionPrism<GA, R::Action>,
    environment: fn(&GE) -> &R::Environment,
) -> OptionalPullback<R, GS, GA, GE>
where
    R: Reducer,
{
    OptionalPullback {
        reducer,
        state,
        action,
        environment,
    }
}

/// Reducer returned by [`optional_pullback`].
pub struct OptionalPullback<R, GS, GA, GE>
where
    R: Reducer,
{
    reducer: R,
    state: OptionalStateLens<GS, R::State>,
    action: ActionPrism<GA, R::Action>,
    environment: fn(&GE) -> &R::Environment,
}

impl<R, GS, GA, GE> Reducer for OptionalPullback<R, GS, GA, GE>
where
    R: Reducer,
    R::Action: Send + 'static,
    GA: Send + 'static,
{
    type State = GS;
    type Action = GA;
    type Environment = GE;

    fn reduce(&self, state: &mut GS, action: GA, env: &GE) -> ReduceResult<GA> {
        let Some(mut local) = (self.state.get)(state) else {
            return Ok(Effect::none());
        };
        let Some(local_action) = (self.action.extract)(action) else {
            return Ok(Effect::none());
        };

        let effect = self
            .reducer
            .reduce(&mut local, local_action, (self.environment)(env))?;
        (self.state.set)(state, local);

        Ok(effect.map(self.action.embed))
    }
}

/// A collection whose elements can be addressed by key.
///
/// Implemented for `Vec<T>` (by index), `HashMap` and `BTreeMap`.
pub trait KeyedCollection {
    /// Key type addressing one element
    type Key: Clone + fmt::Debug + Send + Sync + 'static;

    /// Element type
    type Element;

    /// Mutable access to the element at `key`
    fn element_mut(&mut self, key: &Self::Key) -> Option<&mut Self::Element>;
}

impl<T> KeyedCollection for Vec<T> {
    type Key = usize;
    type Element = T;

    fn element_mut(&mut self, key: &usize) -> Option<&mut T> {
        self.get_mut(*key)
    }
}

impl<K, V, H> KeyedCollection for HashMap<K, V, H>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    H: BuildHasher,
{
    type Key = K;
    type Element = V;

    fn element_mut(&mut self, key: &K) -> Option<&mut V> {
        self.get_mut(key)
    }
}

impl<K, V> KeyedCollection for BTreeMap<K, V>
where
    K: Ord + Clone + fmt::Debug + Send + Sync + 'static,
{
    type Key = K;
    type Element = V;

    fn element_mut(&mut self, key: &K) -> Option<&mut V> {
        self.get_mut(key)
    }
}

/// How [`for_each`] finds the collection and routes element actions.
pub struct ForEachLens<PS, PA, C, EA>
where
    C: KeyedCollection,
{
    /// Collection name used in [`ReducerError::MissingElement`]
    pub name: &'static str,
    /// Borrow the collection inside the parent state
    pub collection: fn(&mut PS) -> &mut C,
    /// Split a parent action into a key and an element action
    pub extract: fn(PA) -> Option<(C::Key, EA)>,
    /// Rebuild a parent action from a key and an element action
    pub embed: fn(C::Key, EA) -> PA,
}

/// Run `element` against one entry of a keyed collection, then run `parent`.
///
/// For a parent action carrying `(key, element_action)` the element at `key`
/// is reduced in place first. The parent reducer then sees the same action
/// against the already updated collection, so derived parent fields can be
/// recomputed in the same cycle. Actions yielded by the element effect are
/// embedded back with their key.
///
/// A key that resolves to no element fails with
/// [`ReducerError::MissingElement`].
pub fn for_each<P, E, C>(
    parent: P,
    element: E,
    lens: ForEachLens<P::State, P::Action, C, E::Action>,
) -> ForEach<P, E, C>
where
    P: Reducer,
    E: Reducer<Environment = P::Environment>,
    C: KeyedCollection<Element = E::State>,
{
    ForEach {
        parent,
        element,
        lens,
    }
}

/// Reducer returned by [`for_each`].
pub struct ForEach<P, E, C>
where
    P: Reducer,
    E: Reducer,
    C: KeyedCollection,
{
    parent: P,
    element: E,
    lens: ForEachLens<P::State, P::Action, C, E::Action>,
}

impl<P, E, C> Reducer for ForEach<P, E, C>
where
    P: Reducer,
    P::Action: Clone + Send + 'static,
    E: Reducer<Environment = P::Environment>,
    E::Action: Send + 'static,
    C: KeyedCollection<Element = E::State>,
{
    type State = P::State;
    type Action = P::Action;
    type Environment = P::Environment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> ReduceResult<Self::Action> {
        let element_effect = match (self.lens.extract)(action.clone()) {
            Some((key, element_action)) => {
                let collection = (self.lens.collection)(state);
                let element = collection
                    .element_mut(&key)
                    .ok_or_else(|| ReducerError::missing_element(self.lens.name, &key))?;
                let effect = self.element.reduce(element, element_action, env)?;
                let embed = self.lens.embed;
                effect.map(move |a| embed(key.clone(), a))
            },
            None => Effect::none(),
        };

        let parent_effect = self.parent.reduce(state, action, env)?;
        Ok(element_effect.merge(parent_effect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::from_fn;
    use futures::executor::block_on;
    use proptest::prelude::*;

    fn first_action<A>(effect: Effect<A>) -> Option<A> {
        match effect {
            Effect::Future(future) => block_on(future).ok().flatten(),
            _ => None,
        }
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct TestState {
        counter: i32,
        name: String,
        log: Vec<&'static str>,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Increment,
        SetName(String),
        Reject,
    }

    type Boxed = Box<dyn Reducer<State = TestState, Action = TestAction, Environment = ()> + Send + Sync>;

    fn counter() -> Boxed {
        Box::new(from_fn(|state: &mut TestState, action: TestAction, _env: &()| {
            state.log.push("counter");
            match action {
                TestAction::Increment => {
                    state.counter += 1;
                    Ok(Effect::send(TestAction::SetName(format!("n{}", state.counter))))
                },
                TestAction::Reject => Err(ReducerError::failed("rejected")),
                TestAction::SetName(_) => Ok(Effect::none()),
            }
        }))
    }

    fn namer() -> Boxed {
        Box::new(from_fn(|state: &mut TestState, action: TestAction, _env: &()| {
            state.log.push("namer");
            if let TestAction::SetName(name) = action {
                state.name = name;
            }
            Ok(Effect::none())
        }))
    }

    #[test]
    fn combine_runs_children_in_order() {
        let combined = combine_reducers(vec![counter(), namer()]);
        let mut state = TestState::default();

        let effect = combined.reduce(&mut state, TestAction::Increment, &());
        assert_eq!(state.counter, 1);
        assert_eq!(state.log, vec!["counter", "namer"]);
        let effect = effect.map(first_action);
        assert!(matches!(effect, Ok(Some(TestAction::SetName(ref n))) if n == "n1"));

        let _ = combined.reduce(&mut state, TestAction::SetName("Alice".into()), &());
        assert_eq!(state.name, "Alice");
    }

    #[test]
    fn combine_stops_at_first_failure() {
        let combined = combine_reducers(vec![counter(), namer()]);
        let mut state = TestState::default();

        let result = combined.reduce(&mut state, TestAction::Reject, &());
        assert!(result.is_err());
        assert_eq!(state.log, vec!["counter"]);
    }

    #[test]
    fn combine_with_appends() {
        let combined = combine_reducers(vec![counter()]).with(namer());
        assert_eq!(combined.len(), 2);
        assert!(!combined.is_empty());
    }

    #[derive(Clone, Debug, Default)]
    struct Volume {
        level: u8,
    }

    #[derive(Debug, Default)]
    struct Player {
        volume: Volume,
        track: String,
    }

    #[test]
    fn scope_reducer_leaves_siblings_alone() {
        let scoped = scope_reducer(
            from_fn(|v: &mut Volume, step: u8, _: &()| {
                v.level = v.level.saturating_add(step);
                Ok(Effect::none())
            }),
            |player: &Player| &player.volume,
            |player: &mut Player, volume| player.volume = volume,
        );

        let mut player = Player {
            volume: Volume { level: 250 },
            track: "intro".into(),
        };
        let _ = scoped.reduce(&mut player, 10, &());
        assert_eq!(player.volume.level, 255);
        assert_eq!(player.track, "intro");
    }

    // Parent/child fixtures for pullback
    #[derive(Clone, Debug, Default, PartialEq)]
    struct Parent {
        child: i64,
        other: String,
        detail: Option<i64>,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum ParentAction {
        Child(ChildAction),
        Detail(ChildAction),
        Unrelated,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum ChildAction {
        Add(i64),
        Echo(i64),
    }

    struct Env {
        child: i64,
    }

    fn child_reducer() -> impl Reducer<State = i64, Action = ChildAction, Environment = i64> {
        from_fn(|value: &mut i64, action: ChildAction, bonus: &i64| match action {
            ChildAction::Add(n) => {
                *value += n + bonus;
                Ok(Effect::send(ChildAction::Echo(*value)))
            },
            ChildAction::Echo(_) => Ok(Effect::none()),
        })
    }

    const CHILD_LENS: StateLens<Parent, i64> =
        StateLens::new(|p| p.child, |p, child| p.child = child);

    const CHILD_PRISM: ActionPrism<ParentAction, ChildAction> = ActionPrism::new(
        |action| match action {
            ParentAction::Child(a) => Some(a),
            _ => None,
        },
        ParentAction::Child,
    );

    #[test]
    fn pullback_reduces_and_embeds_effect_actions() {
        let reducer = pullback(child_reducer(), CHILD_LENS, CHILD_PRISM, |env: &Env| &env.child);
        let mut state = Parent::default();

        let effect = reducer.reduce(&mut state, ParentAction::Child(ChildAction::Add(2)), &Env {
            child: 1,
        });
        assert_eq!(state.child, 3);
        assert_eq!(
            effect.ok().and_then(first_action),
            Some(ParentAction::Child(ChildAction::Echo(3)))
        );
    }

    #[test]
    fn pullback_ignores_unrelated_actions() {
        let reducer = pullback(child_reducer(), CHILD_LENS, CHILD_PRISM, |env: &Env| &env.child);
        let mut state = Parent {
            child: 5,
            ..Parent::default()
        };

        let effect = reducer.reduce(&mut state, ParentAction::Unrelated, &Env { child: 1 });
        assert_eq!(state.child, 5);
        assert!(effect.is_ok_and(|e| e.is_none()));
    }

    #[test]
    fn optional_pullback_is_noop_without_child_state() {
        let reducer = optional_pullback(
            child_reducer(),
            OptionalStateLens::new(|p: &Parent| p.detail, |p: &mut Parent, d| p.detail = Some(d)),
            ActionPrism::new(
                |action: ParentAction| match action {
                    ParentAction::Detail(a) => Some(a),
                    _ => None,
                },
                ParentAction::Detail,
            ),
            |env: &Env| &env.child,
        );
        let env = Env { child: 0 };

        let mut state = Parent::default();
        let effect = reducer.reduce(&mut state, ParentAction::Detail(ChildAction::Add(1)), &env);
        assert_eq!(state.detail, None);
        assert!(effect.is_ok_and(|e| e.is_none()));

        state.detail = Some(10);
        let effect = reducer.reduce(&mut state, ParentAction::Detail(ChildAction::Add(1)), &env);
        assert_eq!(state.detail, Some(11));
        assert_eq!(
            effect.ok().and_then(first_action),
            Some(ParentAction::Detail(ChildAction::Echo(11)))
        );
    }

    // forEach fixtures
    #[derive(Clone, Debug, Default, PartialEq)]
    struct Cart {
        items: Vec<Item>,
        total: u32,
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Item {
        quantity: u32,
        price: u32,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum CartAction {
        Item(usize, ItemAction),
        Clear,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum ItemAction {
        SetQuantity(u32),
        QuantityChanged,
    }

    fn cart_reducer() -> impl Reducer<State = Cart, Action = CartAction, Environment = ()> {
        let item = from_fn(|item: &mut Item, action: ItemAction, _: &()| match action {
            ItemAction::SetQuantity(q) => {
                item.quantity = q;
                Ok(Effect::send(ItemAction::QuantityChanged))
            },
            ItemAction::QuantityChanged => Ok(Effect::none()),
        });
        let parent = from_fn(|cart: &mut Cart, action: CartAction, _: &()| {
            if matches!(action, CartAction::Clear) {
                cart.items.clear();
            }
            cart.total = cart.items.iter().map(|i| i.quantity * i.price).sum();
            Ok(Effect::none())
        });

        for_each(parent, item, ForEachLens {
            name: "items",
            collection: |cart: &mut Cart| &mut cart.items,
            extract: |action: CartAction| match action {
                CartAction::Item(index, a) => Some((index, a)),
                CartAction::Clear => None,
            },
            embed: CartAction::Item,
        })
    }

    #[test]
    fn for_each_updates_element_before_parent_runs() {
        let reducer = cart_reducer();
        let mut cart = Cart {
            items: vec![
                Item { quantity: 1, price: 10 },
                Item { quantity: 1, price: 20 },
                Item { quantity: 1, price: 30 },
            ],
            total: 60,
        };

        let effect = reducer.reduce(&mut cart, CartAction::Item(2, ItemAction::SetQuantity(3)), &());
        assert_eq!(cart.items[2].quantity, 3);
        // The parent's derived total already reflects the element change.
        assert_eq!(cart.total, 120);
        assert_eq!(
            effect.ok().and_then(first_action),
            Some(CartAction::Item(2, ItemAction::QuantityChanged))
        );
    }

    #[test]
    fn for_each_fails_loudly_on_missing_key() {
        let reducer = cart_reducer();
        let mut cart = Cart::default();

        let result = reducer.reduce(&mut cart, CartAction::Item(4, ItemAction::SetQuantity(1)), &());
        match result {
            Err(ReducerError::MissingElement { collection, key }) => {
                assert_eq!(collection, "items");
                assert_eq!(key, "4");
            },
            other => panic!("expected missing element, got {other:?}"),
        }
    }

    #[test]
    fn for_each_over_map_by_key() {
        #[derive(Default)]
        struct Scores {
            by_player: BTreeMap<String, u32>,
            best: u32,
        }

        let reducer = for_each(
            from_fn(|scores: &mut Scores, _action: (String, u32), _: &()| {
                scores.best = scores.by_player.values().copied().max().unwrap_or(0);
                Ok(Effect::none())
            }),
            from_fn(|score: &mut u32, points: u32, _: &()| {
                *score += points;
                Ok(Effect::none())
            }),
            ForEachLens {
                name: "by_player",
                collection: |scores: &mut Scores| &mut scores.by_player,
                extract: Some,
                embed: |player, points| (player, points),
            },
        );

        let mut scores = Scores::default();
        scores.by_player.insert("ada".into(), 3);
        let _ = reducer.reduce(&mut scores, ("ada".into(), 4), &());
        assert_eq!(scores.best, 7);

        let missing = reducer.reduce(&mut scores, ("bob".into(), 1), &());
        assert!(matches!(missing, Err(ReducerError::MissingElement { .. })));
    }

    proptest! {
        #[test]
        fn pullback_write_back_round_trips(child in any::<i64>(), add in -1000_i64..1000, bonus in -10_i64..10) {
            let reducer = pullback(
                from_fn(|value: &mut i64, action: ChildAction, bonus: &i64| {
                    if let ChildAction::Add(n) = action {
                        *value = value.wrapping_add(n).wrapping_add(*bonus);
                    }
                    Ok(Effect::none())
                }),
                CHILD_LENS,
                CHILD_PRISM,
                |env: &Env| &env.child,
            );
            let mut global = Parent { child, other: "kept".into(), detail: None };
            let _ = reducer.reduce(&mut global, ParentAction::Child(ChildAction::Add(add)), &Env { child: bonus });

            let expected = child.wrapping_add(add).wrapping_add(bonus);
            prop_assert_eq!((CHILD_LENS.get)(&global), expected);
            prop_assert_eq!(global.other, "kept");
        }

        #[test]
        fn combine_applies_children_sequentially(start in -1000_i32..1000, times in 1_usize..5) {
            let reducers: Vec<Box<dyn Reducer<State = i32, Action = (), Environment = ()> + Send + Sync>> =
                (0..times)
                    .map(|_| -> Box<dyn Reducer<State = i32, Action = (), Environment = ()> + Send + Sync> {
                        Box::new(from_fn(|n: &mut i32, (): (), _: &()| {
                            *n = *n * 2 + 1;
                            Ok(Effect::none())
                        }))
                    })
                    .collect();
            let combined = combine_reducers(reducers);

            let mut state = start;
            let _ = combined.reduce(&mut state, (), &());

            let mut expected = start;
            for _ in 0..times {
                expected = expected * 2 + 1;
            }
            prop_assert_eq!(state, expected);
        }
    }
}
