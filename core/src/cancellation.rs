//! Cancellation of running effects by application-chosen identifiers.
//!
//! A [`CancellationRegistry`] maps each [`CancelId`] to the set of effect
//! executions currently running under it. The registry is an explicit
//! service: stores receive one at construction and every effect execution
//! started by that store registers against it. Stores that are handed the
//! same registry (it is cheap to clone) can cancel each other's effects.
//!
//! All mutation happens under a single mutex, so "cancel everything under
//! `id`, then register the new execution" is atomic with respect to other
//! cancellable effects starting concurrently.

use futures::future::{AbortHandle, AbortRegistration};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Object-safe view of a hashable key.
trait ErasedKey: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_key(&self, other: &dyn ErasedKey) -> bool;
    fn hash_key(&self, state: &mut dyn Hasher);
    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<K> ErasedKey for K
where
    K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_key(&self, other: &dyn ErasedKey) -> bool {
        other.as_any().downcast_ref::<K>() == Some(self)
    }

    fn hash_key(&self, mut state: &mut dyn Hasher) {
        std::any::TypeId::of::<K>().hash(&mut state);
        self.hash(&mut state);
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifier grouping effect executions for later cancellation.
///
/// Any `Hash + Eq + Debug` value works as an identifier. Two ids are equal
/// only when they wrap the same type and compare equal, so `"timer"` and
/// `String::from("timer")` are different identifiers.
///
/// # Example
///
/// ```
/// use ripple_core::CancelId;
///
/// #[derive(Debug, Hash, PartialEq, Eq)]
/// enum Timer {
///     Tick,
/// }
///
/// assert_eq!(CancelId::new(Timer::Tick), CancelId::new(Timer::Tick));
/// assert_ne!(CancelId::new(1_u8), CancelId::new(1_u16));
/// assert_eq!(CancelId::from("search"), CancelId::new("search"));
/// ```
#[derive(Clone)]
pub struct CancelId(Arc<dyn ErasedKey>);

impl CancelId {
    /// Wrap any hashable value as a cancellation identifier.
    #[must_use]
    pub fn new<K>(key: K) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(key))
    }
}

impl PartialEq for CancelId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_key(other.0.as_ref())
    }
}

impl Eq for CancelId {}

impl Hash for CancelId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_key(state);
    }
}

impl fmt::Debug for CancelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelId(")?;
        self.0.fmt_key(f)?;
        f.write_str(")")
    }
}

impl From<&'static str> for CancelId {
    fn from(key: &'static str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CancelId {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

type Executions = HashMap<u64, AbortHandle>;

/// Table of running cancellable effect executions.
///
/// Cloning is cheap and shares the underlying table.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    entries: Arc<Mutex<HashMap<CancelId, Executions>>>,
    next_token: Arc<AtomicU64>,
}

impl CancellationRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CancelId, Executions>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new execution under `id`.
    ///
    /// When `cancel_in_flight` is true every execution already registered
    /// under `id` is cancelled and removed first, inside the same critical
    /// section. The returned [`Registration`] carries the abort registration
    /// for the new execution and removes it from the registry when dropped.
    #[must_use]
    pub fn register(&self, id: &CancelId, cancel_in_flight: bool) -> Registration {
        let (handle, abort) = AbortHandle::new_pair();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.lock();
        let executions = entries.entry(id.clone()).or_default();
        if cancel_in_flight {
            for (_, previous) in executions.drain() {
                previous.abort();
            }
        }
        executions.insert(token, handle);
        drop(entries);

        Registration {
            abort: Some(abort),
            guard: RegistrationGuard {
                registry: self.clone(),
                id: id.clone(),
                token,
            },
        }
    }

    /// Cancel every execution registered under `id`.
    ///
    /// Returns the number of executions that were cancelled.
    pub fn cancel(&self, id: &CancelId) -> usize {
        let removed = self.lock().remove(id);
        removed.map_or(0, |executions| {
            let count = executions.len();
            for handle in executions.into_values() {
                handle.abort();
            }
            count
        })
    }

    /// Cancel every registered execution and clear the registry.
    ///
    /// Returns the number of executions that were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Executions> = self.lock().drain().map(|(_, e)| e).collect();
        let mut count = 0;
        for executions in drained {
            count += executions.len();
            for handle in executions.into_values() {
                handle.abort();
            }
        }
        count
    }

    /// Whether any execution is currently registered under `id`
    #[must_use]
    pub fn is_registered(&self, id: &CancelId) -> bool {
        self.lock().get(id).is_some_and(|e| !e.is_empty())
    }

    /// Total number of registered executions across all ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    /// Whether no execution is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deregister(&self, id: &CancelId, token: u64) {
        let mut entries = self.lock();
        if let Some(executions) = entries.get_mut(id) {
            executions.remove(&token);
            if executions.is_empty() {
                entries.remove(id);
            }
        }
    }
}

impl fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.lock();
        f.debug_map()
            .entries(entries.iter().map(|(id, executions)| (id, executions.len())))
            .finish()
    }
}

/// A live entry in a [`CancellationRegistry`].
///
/// Hand the abort registration to `futures::stream::Abortable` (or
/// `Abortable` future) and keep the registration alive for as long as the
/// execution runs.
#[derive(Debug)]
pub struct Registration {
    abort: Option<AbortRegistration>,
    guard: RegistrationGuard,
}

impl Registration {
    /// Take the abort registration. Returns `None` on the second call.
    pub fn take_abort(&mut self) -> Option<AbortRegistration> {
        self.abort.take()
    }

    /// Split into the abort registration and the deregistration guard.
    #[must_use]
    pub fn into_parts(self) -> (Option<AbortRegistration>, RegistrationGuard) {
        (self.abort, self.guard)
    }
}

/// Removes an execution from its registry when dropped.
pub struct RegistrationGuard {
    registry: CancellationRegistry,
    id: CancelId,
    token: u64,
}

impl fmt::Debug for RegistrationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationGuard")
            .field("id", &self.id)
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.id, self.token);
    }
}
