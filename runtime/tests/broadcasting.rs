//! Integration tests for Store action broadcasting
//!
//! Tests the action observation features: `subscribe_actions` and
//! `send_and_wait_for` see every action produced by effects, and only those.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use ripple_core::{Effect, ReduceResult, Reducer};
use ripple_runtime::{Store, StoreConfig, StoreError};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)]
enum TestAction {
    /// Start a saga with correlation ID
    StartSaga { id: u64 },
    /// Saga step completed
    StepCompleted { id: u64, step: u32 },
    /// Saga finished (terminal action)
    SagaCompleted { id: u64 },
    /// Saga failed (terminal action)
    SagaFailed { id: u64, error: String },
    /// Simple increment command
    Increment,
    /// Incremented event
    Incremented { value: u32 },
}

#[derive(Debug, Clone, Default)]
struct TestState {
    counter: u32,
    saga_steps: Vec<u32>,
}

#[derive(Clone)]
struct TestReducer;

impl Reducer for TestReducer {
    type State = TestState;
    type Action = TestAction;
    type Environment = ();

    fn reduce(&self, state: &mut TestState, action: TestAction, _env: &()) -> ReduceResult<TestAction> {
        match action {
            TestAction::StartSaga { id } => {
                state.saga_steps.clear();
                Ok(Effect::future(async move {
                    // Simulate async work
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Some(TestAction::StepCompleted { id, step: 1 })
                }))
            },

            TestAction::StepCompleted { id, step } => {
                state.saga_steps.push(step);

                if step < 3 {
                    // Continue saga
                    Ok(Effect::future(async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Some(TestAction::StepCompleted { id, step: step + 1 })
                    }))
                } else {
                    // Finish saga
                    Ok(Effect::send(TestAction::SagaCompleted { id }))
                }
            },

            TestAction::SagaCompleted { .. } | TestAction::SagaFailed { .. } => Ok(Effect::none()),

            TestAction::Increment => {
                state.counter += 1;
                Ok(Effect::send(TestAction::Incremented { value: state.counter }))
            },

            TestAction::Incremented { .. } => Ok(Effect::none()),
        }
    }
}

fn store() -> Store<TestState, TestAction> {
    Store::new(TestState::default(), TestReducer, ())
}

// ============================================================================
// Tests
// ============================================================================

/// Test `send_and_wait_for` with immediate response
#[tokio::test]
async fn test_send_and_wait_for_immediate() {
    let store = store();

    let result = store
        .send_and_wait_for(
            TestAction::Increment,
            |action| matches!(action, TestAction::Incremented { .. }),
            Duration::from_secs(1),
        )
        .await;

    assert_eq!(result.unwrap(), TestAction::Incremented { value: 1 });
}

/// Test `send_and_wait_for` with delayed response (saga)
///
/// Verifies that we can wait for a terminal action from a multi-step saga
/// that takes multiple async operations to complete.
#[tokio::test]
async fn test_send_and_wait_for_saga() {
    let store = store();

    let result = store
        .send_and_wait_for(
            TestAction::StartSaga { id: 42 },
            |action| matches!(action, TestAction::SagaCompleted { id: 42 }),
            Duration::from_secs(1),
        )
        .await;

    assert_eq!(result.unwrap(), TestAction::SagaCompleted { id: 42 });

    // Every step was reduced before the terminal action was produced.
    assert_eq!(store.state(|s| s.saga_steps.clone()), vec![1, 2, 3]);
}

/// Test `send_and_wait_for` timeout behavior
#[tokio::test]
async fn test_send_and_wait_for_timeout() {
    let store = store();

    let result = store
        .send_and_wait_for(
            TestAction::StartSaga { id: 99 },
            |action| matches!(action, TestAction::SagaFailed { id: 99, .. }),
            Duration::from_millis(50),
        )
        .await;

    assert!(matches!(result, Err(StoreError::Timeout)));
}

/// Test concurrent subscribers
///
/// Verifies that multiple subscribers can independently wait for
/// different terminal actions without interfering with each other.
#[tokio::test]
async fn test_concurrent_subscribers() {
    let store = Arc::new(store());

    let mut handles = vec![];
    for id in 1..=5 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .send_and_wait_for(
                    TestAction::StartSaga { id },
                    move |action| matches!(action, TestAction::SagaCompleted { id: saga_id } if *saga_id == id),
                    Duration::from_secs(2),
                )
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.expect("Task panicked");
        assert!(result.is_ok(), "Saga {} should complete successfully", i + 1);
    }
}

/// Caller sends are not broadcast; effect feedback is
#[tokio::test]
async fn test_subscribe_actions_sees_only_effect_actions() -> anyhow::Result<()> {
    let store = store();
    let mut rx = store.subscribe_actions();

    let mut handle = store.send(TestAction::Increment).await?;
    handle.wait().await?;

    assert_eq!(rx.recv().await?, TestAction::Incremented { value: 1 });
    assert!(rx.try_recv().is_err());
    Ok(())
}

/// Multiple observers each receive every broadcast action
#[tokio::test]
async fn test_multiple_observers() {
    let store = store();
    let mut first = store.subscribe_actions();
    let mut second = store.subscribe_actions();

    for _ in 0..3 {
        store.send(TestAction::Increment).await.unwrap().wait().await.unwrap();
    }

    for rx in [&mut first, &mut second] {
        let mut values = Vec::new();
        for _ in 0..3 {
            if let TestAction::Incremented { value } = rx.recv().await.unwrap() {
                values.push(value);
            }
        }
        assert_eq!(values, vec![1, 2, 3]);
    }
}

/// A slow observer lags instead of blocking the store
#[tokio::test]
async fn test_lagging_observer_does_not_block_store() {
    let store = Store::builder(TestState::default(), TestReducer, ())
        .with_config(StoreConfig::default().with_action_broadcast_capacity(2))
        .build()
        .unwrap();
    let mut rx = store.subscribe_actions();

    for _ in 0..5 {
        store.send(TestAction::Increment).await.unwrap().wait().await.unwrap();
    }
    assert_eq!(store.state(|s| s.counter), 5);

    assert!(matches!(
        rx.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Lagged(3))
    ));
    assert_eq!(rx.recv().await.unwrap(), TestAction::Incremented { value: 4 });
}
