//! Domain types for the todos example.

use ripple_testing::StateDiff;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a todo item
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TodoId(Uuid);

impl TodoId {
    /// Creates a `TodoId` from a UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for TodoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of fresh todo identifiers
pub trait IdGenerator: Send + Sync {
    /// Produce an identifier never handed out before
    fn generate(&self) -> TodoId;
}

/// Random v4 identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn generate(&self) -> TodoId {
        TodoId(Uuid::new_v4())
    }
}

impl IdGenerator for ripple_testing::SequentialIds {
    fn generate(&self) -> TodoId {
        TodoId(Uuid::from_u128(u128::from(self.next_id())))
    }
}

/// A single todo item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Todo {
    /// Unique identifier
    pub id: TodoId,
    /// What needs doing
    pub description: String,
    /// Whether the todo is done
    pub completed: bool,
}

impl Todo {
    /// A new, open todo with an empty description
    #[must_use]
    pub const fn new(id: TodoId) -> Self {
        Self {
            id,
            description: String::new(),
            completed: false,
        }
    }
}

/// Which todos are listed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    /// Every todo
    #[default]
    All,
    /// Open todos
    Active,
    /// Completed todos
    Completed,
}

impl Filter {
    /// Whether `todo` is listed under this filter
    #[must_use]
    pub const fn includes(self, todo: &Todo) -> bool {
        match self {
            Self::All => true,
            Self::Active => !todo.completed,
            Self::Completed => todo.completed,
        }
    }
}

/// State of the todo list
#[derive(StateDiff, Clone, Debug, Default, PartialEq)]
pub struct TodosState {
    /// All todos by id
    pub todos: BTreeMap<TodoId, Todo>,
    /// Display order, newest first until sorted
    pub order: Vec<TodoId>,
    /// Which todos are listed
    pub filter: Filter,
    /// Number of open todos
    pub remaining: usize,
}

impl TodosState {
    /// Todos listed under the current filter, in display order
    #[must_use]
    pub fn visible(&self) -> Vec<&Todo> {
        self.order
            .iter()
            .filter_map(|id| self.todos.get(id))
            .filter(|todo| self.filter.includes(todo))
            .collect()
    }
}

/// Actions on a single todo
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TodoAction {
    /// Flip the completed flag
    CheckboxToggled,
    /// Replace the description
    DescriptionChanged(String),
}

/// Actions on the todo list
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TodosAction {
    /// Add an empty todo at the top
    AddTodo,
    /// Forward an action to one todo
    Todo(TodoId, TodoAction),
    /// Remove a todo
    Delete(TodoId),
    /// Remove every completed todo
    ClearCompleted,
    /// Change which todos are listed
    FilterChanged(Filter),
    /// Move completed todos below open ones
    SortCompleted,
}

/// Environment for the todos reducers
#[derive(Clone)]
pub struct TodosEnvironment {
    /// Identifier source for new todos
    pub ids: Arc<dyn IdGenerator>,
    /// Quiet period before completed todos are sorted down
    pub sort_delay: std::time::Duration,
}

impl TodosEnvironment {
    /// Creates a new `TodosEnvironment`
    #[must_use]
    pub fn new(ids: Arc<dyn IdGenerator>, sort_delay: std::time::Duration) -> Self {
        Self { ids, sort_delay }
    }
}
