//! Long-lived action sources started with the store.
//!
//! A subscription receives the environment once, at build time, and returns
//! an [`Effect`] (usually a stream) whose actions are fed into the store
//! outside of any caller-initiated batch. Setup errors go through the
//! store's failure handler; an unhandled one aborts
//! [`StoreBuilder::build`](crate::StoreBuilder::build).
//!
//! # Example
//!
//! ```ignore
//! let store = Store::builder(state, reducer, env)
//!     .with_subscription(|env: &Env| {
//!         let ticks = env.clock.ticks(Duration::from_secs(1))?;
//!         Ok(Effect::stream(ticks.map(|_| Action::Tick)))
//!     })
//!     .build()?;
//! ```

use ripple_core::{BoxError, Effect};

/// A source of actions started once when the store is built
pub trait Subscription<E, A>: Send {
    /// Start the subscription.
    ///
    /// # Errors
    ///
    /// Returns an error when the subscription cannot be set up.
    fn subscribe(self: Box<Self>, env: &E) -> Result<Effect<A>, BoxError>;
}

impl<E, A, F> Subscription<E, A> for F
where
    F: FnOnce(&E) -> Result<Effect<A>, BoxError> + Send,
{
    fn subscribe(self: Box<Self>, env: &E) -> Result<Effect<A>, BoxError> {
        (*self)(env)
    }
}
