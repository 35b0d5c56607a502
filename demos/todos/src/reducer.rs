//! Reducers for the todo list.
//!
//! [`TodoReducer`] handles one todo. [`TodosReducer`] handles the list and
//! runs after the element reducer for every action, so the `remaining`
//! count always reflects the todo that was just changed.

use crate::types::{Todo, TodoAction, TodoId, TodosAction, TodosEnvironment, TodosState};
use ripple_core::composition::{for_each, ForEach, ForEachLens};
use ripple_core::{Effect, ReduceResult, Reducer};
use std::collections::BTreeMap;

/// Cancellation id of the pending sort
const SORT: &str = "todos.sort";

/// Reducer for a single todo
#[derive(Clone, Copy, Debug, Default)]
pub struct TodoReducer;

impl Reducer for TodoReducer {
    type State = Todo;
    type Action = TodoAction;
    type Environment = TodosEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> ReduceResult<Self::Action> {
        match action {
            TodoAction::CheckboxToggled => state.completed = !state.completed,
            TodoAction::DescriptionChanged(description) => state.description = description,
        }
        Ok(Effect::none())
    }
}

/// Reducer for the list itself
#[derive(Clone, Copy, Debug, Default)]
pub struct TodosReducer;

impl Reducer for TodosReducer {
    type State = TodosState;
    type Action = TodosAction;
    type Environment = TodosEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> ReduceResult<Self::Action> {
        let effect = match action {
            TodosAction::AddTodo => {
                let id = env.ids.generate();
                state.todos.insert(id, Todo::new(id));
                state.order.insert(0, id);
                Effect::none()
            },
            TodosAction::Todo(_, TodoAction::CheckboxToggled) => {
                Effect::send(TodosAction::SortCompleted).debounce(SORT, env.sort_delay)
            },
            TodosAction::Todo(_, TodoAction::DescriptionChanged(_)) => Effect::none(),
            TodosAction::FilterChanged(filter) => {
                state.filter = filter;
                Effect::none()
            },
            TodosAction::Delete(id) => {
                state.todos.remove(&id);
                state.order.retain(|kept| *kept != id);
                Effect::none()
            },
            TodosAction::ClearCompleted => {
                state.todos.retain(|_, todo| !todo.completed);
                let todos = &state.todos;
                state.order.retain(|id| todos.contains_key(id));
                Effect::none()
            },
            TodosAction::SortCompleted => {
                // Stable: open and completed todos keep their relative order.
                let todos = &state.todos;
                state
                    .order
                    .sort_by_key(|id| todos.get(id).is_some_and(|todo| todo.completed));
                Effect::none()
            },
        };

        state.remaining = state.todos.values().filter(|todo| !todo.completed).count();
        Ok(effect)
    }
}

fn todos_mut(state: &mut TodosState) -> &mut BTreeMap<TodoId, Todo> {
    &mut state.todos
}

fn todo_action(action: TodosAction) -> Option<(TodoId, TodoAction)> {
    match action {
        TodosAction::Todo(id, action) => Some((id, action)),
        _ => None,
    }
}

/// The full todos reducer: element actions first, then the list
pub type AppReducer = ForEach<TodosReducer, TodoReducer, BTreeMap<TodoId, Todo>>;

/// Build the full todos reducer
#[must_use]
pub fn app_reducer() -> AppReducer {
    for_each(
        TodosReducer,
        TodoReducer,
        ForEachLens {
            name: "todos",
            collection: todos_mut,
            extract: todo_action,
            embed: TodosAction::Todo,
        },
    )
}
