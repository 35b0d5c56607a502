//! Todo list example for the Ripple architecture.
//!
//! It demonstrates:
//!
//! - An element reducer lifted over a keyed collection with `for_each`
//! - A parent reducer that recomputes derived state after the element changed
//! - A debounced effect that sorts completed todos down once edits settle
//! - An injected identifier generator, replaced by a sequential one in tests
//!
//! # Quick Start
//!
//! ```no_run
//! use todos::{app_reducer, RandomIds, TodosAction, TodosEnvironment, TodosState};
//! use ripple_runtime::Store;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ripple_runtime::StoreError> {
//! let env = TodosEnvironment::new(Arc::new(RandomIds), Duration::from_secs(1));
//! let store = Store::new(TodosState::default(), app_reducer(), env);
//!
//! store.send(TodosAction::AddTodo).await?;
//! assert_eq!(store.state(|s| s.remaining), 1);
//! # Ok(())
//! # }
//! ```

pub mod reducer;
pub mod types;

pub use reducer::{app_reducer, AppReducer, TodoReducer, TodosReducer};
pub use types::{
    Filter, IdGenerator, RandomIds, Todo, TodoAction, TodoId, TodosAction, TodosEnvironment, TodosState,
};
