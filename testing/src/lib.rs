//! # Ripple Testing
//!
//! Testing utilities for the Ripple architecture.
//!
//! This crate provides:
//! - [`TestStore`]: step-by-step assertions over a running store, with
//!   exhaustive and non-exhaustive modes
//! - [`StateDiff`]: field-level state comparison, derivable with
//!   `#[derive(StateDiff)]`
//! - [`ReducerTest`]: Given-When-Then checks of a single reduction
//! - Mock environment dependencies ([`FixedClock`], [`SequentialIds`])
//!
//! ## Example
//!
//! ```ignore
//! use ripple_testing::{TestStore, unchanged};
//!
//! #[tokio::test]
//! async fn fact_is_loaded() -> Result<(), TestStoreError> {
//!     let mut store = TestStore::new(FeatureState::default(), FeatureReducer, env);
//!
//!     store.send(FeatureAction::FactButtonTapped, |s| s.loading = true).await?;
//!     store.receive(FeatureAction::FactLoaded("0 is a number".into()), |s| {
//!         s.loading = false;
//!         s.fact = Some("0 is a number".into());
//!     }).await?;
//!
//!     store.finish().await
//! }
//! ```

extern crate self as ripple_testing;

pub mod diff;
pub mod test_store;

/// Mock implementations of environment dependencies
pub mod mocks {
    use chrono::{DateTime, Utc};
    use ripple_core::environment::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ripple_testing::mocks::FixedClock;
    /// use ripple_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable identifiers: 0, 1, 2, ...
    ///
    /// Clones share the same counter.
    #[derive(Debug, Clone, Default)]
    pub struct SequentialIds {
        next: Arc<AtomicU64>,
    }

    impl SequentialIds {
        /// Start counting from zero
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Take the next identifier
        pub fn next_id(&self) -> u64 {
            self.next.fetch_add(1, Ordering::Relaxed)
        }
    }
}

/// Install a `tracing` subscriber for test output.
///
/// Honors `RUST_LOG`, defaulting to `ripple_runtime=debug,ripple_testing=info`.
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("ripple_runtime=debug,ripple_testing=info")
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub use diff::{FieldChange, StateDiff};
pub use mocks::{test_clock, FixedClock, SequentialIds};
pub use reducer_test::{assertions, ReducerTest};
pub use ripple_macros::StateDiff;
pub use test_store::{
    unchanged, Exhaustivity, TestAction, TestStore, TestStoreError, DEFAULT_TIMEOUT,
};

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::environment::Clock;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn sequential_ids_are_shared_between_clones() {
        let ids = SequentialIds::new();
        let other = ids.clone();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(other.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }
}
