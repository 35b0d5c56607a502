//! Command-line walk through the todos example.

use ripple_runtime::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use todos::{app_reducer, RandomIds, TodoAction, TodosAction, TodosEnvironment, TodosState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_list(state: &TodosState) {
    for todo in state.visible() {
        let status = if todo.completed { "x" } else { " " };
        println!("  [{status}] {}", todo.description);
    }
    println!("  {} remaining", state.remaining);
}

#[tokio::main]
async fn main() -> Result<(), StoreError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "todos=debug,ripple_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Todos Example ===\n");

    let env = TodosEnvironment::new(Arc::new(RandomIds), Duration::from_millis(500));
    let store = Store::new(TodosState::default(), app_reducer(), env);

    for description in ["Deploy to production", "Write documentation", "Buy milk"] {
        store.send(TodosAction::AddTodo).await?;
        let id = store.state(|s| s.order[0]);

        // Each row talks to its own todo through a view.
        let row = store.optional_view(move |s| s.todos.get(&id).cloned(), move |a| TodosAction::Todo(id, a));
        row.send(TodoAction::DescriptionChanged(description.to_string())).await?;
    }
    store.state(print_list);

    println!("\nCompleting 'Buy milk', then waiting for the list to sort...");
    let first = store.state(|s| s.order[0]);
    let sorted = store
        .send_and_wait_for(
            TodosAction::Todo(first, TodoAction::CheckboxToggled),
            |action| *action == TodosAction::SortCompleted,
            Duration::from_secs(2),
        )
        .await?;
    tracing::info!(action = ?sorted, "List sorted");
    store.state(print_list);

    println!("\nClearing completed todos...");
    store.send(TodosAction::ClearCompleted).await?;
    store.state(print_list);

    store.graceful_shutdown().await?;
    println!("\n=== Demo Complete ===");
    Ok(())
}
