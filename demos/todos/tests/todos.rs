//! End-to-end todo list flows through TestStore and Store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;
use ripple_core::{ReducerError, Reducer};
use ripple_runtime::{Store, StoreError};
use ripple_testing::{unchanged, SequentialIds, TestStore, TestStoreError};
use std::sync::Arc;
use std::time::Duration;
use todos::{app_reducer, Todo, TodoAction, TodoId, TodosAction, TodosEnvironment, TodosState};
use uuid::Uuid;

fn env() -> TodosEnvironment {
    TodosEnvironment::new(Arc::new(SequentialIds::new()), Duration::from_secs(1))
}

fn id(n: u128) -> TodoId {
    TodoId::from_uuid(Uuid::from_u128(n))
}

fn three_todos() -> TodosState {
    let mut state = TodosState::default();
    for n in 0..3 {
        state.todos.insert(
            id(n),
            Todo {
                id: id(n),
                description: format!("todo {n}"),
                completed: false,
            },
        );
        state.order.push(id(n));
    }
    state.remaining = 3;
    state
}

#[tokio::test]
async fn adding_uses_injected_ids() {
    let mut store = TestStore::new(TodosState::default(), app_reducer(), env());

    store
        .send(TodosAction::AddTodo, |s| {
            s.todos.insert(id(0), Todo::new(id(0)));
            s.order = vec![id(0)];
            s.remaining = 1;
        })
        .await
        .unwrap();
    store
        .send(TodosAction::AddTodo, |s| {
            s.todos.insert(id(1), Todo::new(id(1)));
            s.order = vec![id(1), id(0)];
            s.remaining = 2;
        })
        .await
        .unwrap();

    store.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn element_change_is_visible_to_parent_in_same_step() {
    let mut store = TestStore::new(three_todos(), app_reducer(), env());

    store
        .send(TodosAction::Todo(id(2), TodoAction::CheckboxToggled), |s| {
            s.todos.get_mut(&id(2)).unwrap().completed = true;
            s.remaining = 2;
        })
        .await
        .unwrap();

    store.advance(Duration::from_secs(1)).await;
    store
        .receive(TodosAction::SortCompleted, unchanged)
        .await
        .unwrap();

    store.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn sorting_waits_for_edits_to_settle() {
    let mut store = TestStore::new(three_todos(), app_reducer(), env());

    store
        .send(TodosAction::Todo(id(0), TodoAction::CheckboxToggled), |s| {
            s.todos.get_mut(&id(0)).unwrap().completed = true;
            s.remaining = 2;
        })
        .await
        .unwrap();
    store.advance(Duration::from_millis(500)).await;

    store
        .send(TodosAction::Todo(id(1), TodoAction::CheckboxToggled), |s| {
            s.todos.get_mut(&id(1)).unwrap().completed = true;
            s.remaining = 1;
        })
        .await
        .unwrap();

    // The first toggle's sort was superseded.
    store.advance(Duration::from_millis(500)).await;
    assert_eq!(store.state().order, vec![id(0), id(1), id(2)]);

    store.advance(Duration::from_millis(500)).await;
    store
        .receive(TodosAction::SortCompleted, |s| {
            s.order = vec![id(2), id(0), id(1)];
        })
        .await
        .unwrap();

    store.finish().await.unwrap();
}

#[tokio::test]
async fn unknown_todo_rejects_the_send() {
    let mut store = TestStore::new(three_todos(), app_reducer(), env());

    let error = store
        .send(TodosAction::Todo(id(7), TodoAction::CheckboxToggled), unchanged)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        TestStoreError::Store(StoreError::Reducer(ReducerError::MissingElement { collection: "todos", .. }))
    ));
    assert_eq!(store.state(), three_todos());

    store.finish().await.unwrap();
}

#[tokio::test]
async fn row_view_stops_accepting_actions_once_deleted() {
    let store = Store::new(three_todos(), app_reducer(), env());
    let row = store.optional_view(
        |s: &TodosState| s.todos.get(&id(1)).cloned(),
        |a| TodosAction::Todo(id(1), a),
    );

    row.send(TodoAction::DescriptionChanged("renamed".into())).await.unwrap();
    assert_eq!(row.state(|todo| todo.as_ref().map(|t| t.description.clone())), Some("renamed".into()));

    store.send(TodosAction::Delete(id(1))).await.unwrap();
    assert!(row.current_state().is_none());
    assert!(matches!(
        row.send(TodoAction::CheckboxToggled).await,
        Err(StoreError::StateUnavailable)
    ));
}

proptest! {
    #[test]
    fn remaining_always_counts_open_todos(toggles in prop::collection::vec(0_u128..3, 0..20)) {
        let reducer = app_reducer();
        let env = env();
        let mut state = three_todos();

        for n in toggles {
            let _ = reducer.reduce(&mut state, TodosAction::Todo(id(n), TodoAction::CheckboxToggled), &env);
            let open = state.todos.values().filter(|todo| !todo.completed).count();
            prop_assert_eq!(state.remaining, open);
        }
    }
}
