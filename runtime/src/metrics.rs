//! Prometheus metrics for stores.
//!
//! Stores always record through the `metrics` facade; nothing is exported
//! until a recorder is installed. [`MetricsRecorder`] installs the
//! Prometheus recorder and renders the text exposition format. Serving it
//! over HTTP is left to the application.
//!
//! Recorded metrics:
//! - `store.actions.total`, `store.batches.total`
//! - `store.reducer.duration_seconds`
//! - `store.effects.{started,completed,failed,panicked,cancelled}`
//! - `store.effects.running`
//! - `store.failures.{handled,unhandled}` labelled by `kind`
//! - `store.shutdown.{initiated,completed,timeout,rejected_actions}`
//!
//! # Example
//!
//! ```rust,no_run
//! use ripple_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // ... run stores ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders what stores recorded.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the store metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this
    /// logs a warning and leaves [`MetricsRecorder::render`] returning `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Whether this recorder owns the installed exporter.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this recorder hasn't been installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!("store.actions.total", "Total number of actions reduced");
    describe_counter!("store.batches.total", "Total number of batches published");
    describe_histogram!("store.reducer.duration_seconds", "Time taken by one reduce call");

    describe_counter!("store.effects.started", "Effect executions started");
    describe_counter!("store.effects.completed", "Effect executions that ended normally or were cancelled");
    describe_counter!("store.effects.failed", "Effect executions stopped by an unhandled failure");
    describe_counter!("store.effects.panicked", "Effect executions that panicked");
    describe_counter!("store.effects.cancelled", "Cancellable effects stopped by cancel effects");
    describe_gauge!("store.effects.running", "Effect executions currently running");

    describe_counter!("store.failures.handled", "Failures swallowed by the failure handler");
    describe_counter!("store.failures.unhandled", "Failures rethrown by the failure handler");

    describe_counter!("store.shutdown.initiated", "Graceful shutdowns started");
    describe_counter!("store.shutdown.completed", "Graceful shutdowns that drained every effect");
    describe_counter!("store.shutdown.timeout", "Graceful shutdowns that timed out");
    describe_counter!("store.shutdown.rejected_actions", "Actions rejected during shutdown");
}
