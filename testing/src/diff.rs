//! Field-level state comparison.
//!
//! [`TestStore`](crate::TestStore) compares expected and actual states with
//! [`StateDiff`] so that failures name the fields that differ instead of
//! dumping two whole states.
//!
//! Leaf types (numbers, strings, collections, options) compare as whole
//! values. Structs get field-by-field comparison from
//! `#[derive(StateDiff)]`:
//!
//! ```
//! use ripple_testing::StateDiff;
//!
//! #[derive(StateDiff, Clone, Debug, PartialEq)]
//! struct Profile {
//!     name: String,
//!     visits: u32,
//!     #[diff(skip)]
//!     session: u64,
//! }
//!
//! let before = Profile { name: "ada".into(), visits: 1, session: 7 };
//! let after = Profile { name: "ada".into(), visits: 2, session: 8 };
//!
//! let changes = before.diff(&after);
//! assert_eq!(changes.len(), 1);
//! assert_eq!(changes[0].path, "visits");
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

/// One field whose expected and actual values differ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Dotted path of the field, empty for the root value
    pub path: String,
    /// `Debug` rendering of the expected value
    pub expected: String,
    /// `Debug` rendering of the actual value
    pub actual: String,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "state" } else { &self.path };
        write!(f, "{path}: expected {}, actual {}", self.expected, self.actual)
    }
}

/// Render a list of changes, one per line
#[must_use]
pub fn render_changes(changes: &[FieldChange]) -> String {
    changes
        .iter()
        .map(|change| format!("  {change}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Structural comparison between two values of the same type
pub trait StateDiff {
    /// Append every difference between `self` (expected) and `other`
    /// (actual) to `changes`, prefixing paths with `path`.
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>);

    /// All differences between `self` (expected) and `other` (actual)
    fn diff(&self, other: &Self) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        self.diff_into(other, "", &mut changes);
        changes
    }

    /// Whether the two values agree on every compared field
    fn same_as(&self, other: &Self) -> bool {
        self.diff(other).is_empty()
    }
}

/// Compare two values as a whole
pub fn diff_value<T>(expected: &T, actual: &T, path: &str, changes: &mut Vec<FieldChange>)
where
    T: PartialEq + fmt::Debug + ?Sized,
{
    if expected != actual {
        changes.push(FieldChange {
            path: path.to_string(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        });
    }
}

/// Join a parent path and a field name
#[must_use]
pub fn field_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

macro_rules! whole_value_diff {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StateDiff for $ty {
                fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
                    diff_value(self, other, path, changes);
                }
            }
        )*
    };
}

whole_value_diff!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, &'static str, Duration,
);

impl<T> StateDiff for Option<T>
where
    T: PartialEq + fmt::Debug,
{
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
        diff_value(self, other, path, changes);
    }
}

impl<T> StateDiff for Vec<T>
where
    T: PartialEq + fmt::Debug,
{
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
        diff_value(self, other, path, changes);
    }
}

impl<T> StateDiff for VecDeque<T>
where
    T: PartialEq + fmt::Debug,
{
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
        diff_value(self, other, path, changes);
    }
}

impl<K, V> StateDiff for HashMap<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: PartialEq + fmt::Debug,
{
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
        diff_value(self, other, path, changes);
    }
}

impl<K, V> StateDiff for BTreeMap<K, V>
where
    K: Ord + fmt::Debug,
    V: PartialEq + fmt::Debug,
{
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
        diff_value(self, other, path, changes);
    }
}

impl<T> StateDiff for HashSet<T>
where
    T: Eq + Hash + fmt::Debug,
{
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
        diff_value(self, other, path, changes);
    }
}

impl<T> StateDiff for BTreeSet<T>
where
    T: Ord + fmt::Debug,
{
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
        diff_value(self, other, path, changes);
    }
}

impl<T> StateDiff for Box<T>
where
    T: StateDiff + ?Sized,
{
    fn diff_into(&self, other: &Self, path: &str, changes: &mut Vec<FieldChange>) {
        (**self).diff_into(other, path, changes);
    }
}
