//! Integration tests for Counter with Store and TestStore
//!
//! These tests demonstrate the full end-to-end flow of the
//! Ripple architecture.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use counter::{
    CounterAction, CounterEnvironment, CounterReducer, CounterState, FactClient, FactError, LocalFacts,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use ripple_core::environment::Clock;
use ripple_runtime::Store;
use ripple_testing::{test_clock, unchanged, FixedClock, TestStore};
use std::sync::Arc;
use std::time::Duration;

struct FailingFacts;

impl FactClient for FailingFacts {
    fn fact(&self, _number: i64) -> BoxFuture<'static, Result<String, FactError>> {
        async { Err(FactError("service unavailable".into())) }.boxed()
    }
}

fn env_with(facts: Arc<dyn FactClient>) -> CounterEnvironment<FixedClock> {
    CounterEnvironment::new(test_clock(), facts, Duration::from_secs(1))
}

fn env() -> CounterEnvironment<FixedClock> {
    env_with(Arc::new(LocalFacts::new(Duration::from_millis(10))))
}

#[tokio::test]
async fn test_counter_with_store() {
    let store = Store::new(CounterState::default(), CounterReducer::new(), env());

    assert_eq!(store.state(|s| s.count), 0);

    store.send(CounterAction::Increment).await.unwrap();
    assert_eq!(store.state(|s| s.count), 1);

    store.send(CounterAction::Increment).await.unwrap();
    assert_eq!(store.state(|s| s.count), 2);

    store.send(CounterAction::Decrement).await.unwrap();
    assert_eq!(store.state(|s| s.count), 1);

    store.send(CounterAction::Reset).await.unwrap();
    assert_eq!(store.state(|s| s.count), 0);
}

#[tokio::test]
async fn test_concurrent_increments() {
    let store = Store::new(CounterState::default(), CounterReducer::new(), env());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store.send(CounterAction::Increment).await.unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.state(|s| s.count), 10);
}

#[tokio::test]
async fn test_state_isolation() {
    let store1 = Store::new(CounterState::default(), CounterReducer::new(), env());
    let store2 = Store::new(CounterState::default(), CounterReducer::new(), env());

    store1.send(CounterAction::Increment).await.unwrap();
    store1.send(CounterAction::Increment).await.unwrap();
    store2.send(CounterAction::Increment).await.unwrap();

    assert_eq!(store1.state(|s| s.count), 2);
    assert_eq!(store2.state(|s| s.count), 1);
}

#[tokio::test]
async fn fact_is_loaded_for_current_count() {
    let now = test_clock().now();
    let mut store = TestStore::new(CounterState::default(), CounterReducer::new(), env());

    store
        .send(CounterAction::Increment, |s| {
            s.count = 1;
            s.changed_at = Some(now);
        })
        .await
        .unwrap();
    store.send(CounterAction::FactRequested, |s| s.loading = true).await.unwrap();
    store
        .receive(CounterAction::FactLoaded("1 is odd.".into()), |s| {
            s.loading = false;
            s.fact = Some("1 is odd.".into());
        })
        .await
        .unwrap();

    store.finish().await.unwrap();
}

#[tokio::test]
async fn fact_failure_is_recorded() {
    let mut store = TestStore::new(
        CounterState::default(),
        CounterReducer::new(),
        env_with(Arc::new(FailingFacts)),
    );

    store.send(CounterAction::FactRequested, |s| s.loading = true).await.unwrap();
    store
        .receive(
            CounterAction::FactFailed("fact lookup failed: service unavailable".into()),
            |s| {
                s.loading = false;
                s.error = Some("fact lookup failed: service unavailable".into());
            },
        )
        .await
        .unwrap();

    store.finish().await.unwrap();
}

#[tokio::test]
async fn repeated_fact_requests_keep_only_the_latest() {
    let mut store = TestStore::new(CounterState::default(), CounterReducer::new(), env());

    store.send(CounterAction::FactRequested, |s| s.loading = true).await.unwrap();
    store.send(CounterAction::FactRequested, unchanged).await.unwrap();
    store
        .receive(CounterAction::FactLoaded("0 is the additive identity.".into()), |s| {
            s.loading = false;
            s.fact = Some("0 is the additive identity.".into());
        })
        .await
        .unwrap();

    // The first request was cancelled, so nothing else arrives.
    store.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timer_ticks_until_stopped() {
    let now = test_clock().now();
    let mut store = TestStore::new(CounterState::default(), CounterReducer::new(), env());

    store.send(CounterAction::TimerToggled, |s| s.timer_running = true).await.unwrap();

    for expected in 1..=3 {
        store.advance(Duration::from_secs(1)).await;
        store
            .receive(CounterAction::TimerTicked, |s| {
                s.count = expected;
                s.changed_at = Some(now);
            })
            .await
            .unwrap();
    }

    store.send(CounterAction::TimerToggled, |s| s.timer_running = false).await.unwrap();
    store.advance(Duration::from_secs(5)).await;

    store.finish().await.unwrap();
}
