//! Counter example binary
//!
//! Demonstrates the Ripple architecture with a counter, a fact lookup and a
//! timer.

use counter::{CounterAction, CounterEnvironment, CounterReducer, CounterState};
use futures::StreamExt;
use ripple_core::environment::SystemClock;
use ripple_runtime::metrics::MetricsRecorder;
use ripple_runtime::{Store, StoreConfig, SwallowFailures};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "counter=debug,ripple_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Counter Example: Ripple Architecture ===\n");

    let mut recorder = MetricsRecorder::new();
    recorder.install()?;

    let env = CounterEnvironment::local(SystemClock);
    let store = Store::builder(CounterState::default(), CounterReducer::new(), env)
        .with_config(StoreConfig::default().with_shutdown_timeout(Duration::from_secs(5)))
        .with_failure_handler(SwallowFailures)
        .build()?;

    // Print every published count change
    let mut counts = store.observe().map(|state| state.count);
    let printer = tokio::spawn(async move {
        let mut last = None;
        while let Some(count) = counts.next().await {
            if last != Some(count) {
                println!("  count = {count}");
                last = Some(count);
            }
        }
    });

    println!(">>> Increment x3, Decrement");
    for action in [
        CounterAction::Increment,
        CounterAction::Increment,
        CounterAction::Increment,
        CounterAction::Decrement,
    ] {
        store.send(action).await?;
    }

    println!("\n>>> FactRequested");
    let answer = store
        .send_and_wait_for(
            CounterAction::FactRequested,
            |action| matches!(action, CounterAction::FactLoaded(_) | CounterAction::FactFailed(_)),
            Duration::from_secs(5),
        )
        .await?;
    println!("  answer: {answer:?}");

    println!("\n>>> TimerToggled (running for ~3s)");
    store.send(CounterAction::TimerToggled).await?;
    tokio::time::sleep(Duration::from_millis(3_200)).await;
    store.send(CounterAction::TimerToggled).await?;
    println!("  timer stopped at {}", store.state(|s| s.count));

    println!("\n>>> Reset");
    store.send(CounterAction::Reset).await?;

    store.graceful_shutdown().await?;
    tracing::info!(count = store.state(|s| s.count), "Store shut down");
    drop(store);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    if let Some(text) = recorder.render() {
        println!("\n>>> Metrics");
        for line in text.lines().filter(|line| line.starts_with("store_")) {
            println!("  {line}");
        }
    }

    println!("\n=== Architecture Demonstration Complete ===");
    Ok(())
}
