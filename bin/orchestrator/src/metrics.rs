//! Prometheus metrics for the orchestrator.
//!
//! All metrics are aggregated in the [`Metrics`] struct for easy tracking and management.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::{collections::HashSet, time::Duration};
use store::{ActionKey, ActionStatus, StatusBus, StatusUpdate};
use tokio::task::JoinHandle;

/// Aggregated metrics for the orchestrator.
///
/// This struct provides a centralized interface for recording all orchestrator metrics.
/// Metrics are registered with the global metrics registry on creation.
#[derive(Debug, Clone)]
pub struct Metrics {
    _private: (),
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance and register all metric descriptions.
    pub fn new() -> Self {
        Self::register_descriptions();
        Self { _private: () }
    }

    /// Register metric descriptions with the global registry.
    fn register_descriptions() {
        // Action metrics
        describe_counter!(
            "orchestrator_action_transitions_total",
            "Total action status transitions by kind and status"
        );
        describe_counter!(
            "orchestrator_actions_settled_total",
            "Total actions confirmed on-chain by kind"
        );
        describe_counter!(
            "orchestrator_actions_failed_total",
            "Total failed actions by kind"
        );
        describe_gauge!(
            "orchestrator_actions_in_flight",
            "Number of actions between checking and settlement"
        );
        describe_histogram!(
            "orchestrator_action_duration_seconds",
            "Duration from request to settlement or failure in seconds"
        );

        // API metrics
        describe_counter!(
            "orchestrator_api_requests_total",
            "Total API requests by operation"
        );
        describe_counter!(
            "orchestrator_api_failures_total",
            "Total failed API requests by operation"
        );
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Action metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Record a status transition. `was_in_flight` tells whether the key was
    /// between checking and settlement before it.
    pub fn record_transition(&self, update: &StatusUpdate, was_in_flight: bool) {
        let kind = update.key.kind.as_str();
        counter!(
            "orchestrator_action_transitions_total",
            "kind" => kind,
            "status" => update.status.as_str()
        )
        .increment(1);

        match &update.status {
            ActionStatus::Settled => {
                counter!("orchestrator_actions_settled_total", "kind" => kind).increment(1);
            }
            ActionStatus::Failed(_) => {
                counter!("orchestrator_actions_failed_total", "kind" => kind).increment(1);
            }
            _ => {}
        }

        match (was_in_flight, update.status.is_in_flight()) {
            (false, true) => gauge!("orchestrator_actions_in_flight").increment(1.0),
            (true, false) => gauge!("orchestrator_actions_in_flight").decrement(1.0),
            _ => {}
        }
    }

    /// Record the wall-clock duration of one action.
    pub fn record_action_duration(&self, kind: &str, duration: Duration) {
        histogram!("orchestrator_action_duration_seconds", "kind" => kind.to_string())
            .record(duration.as_secs_f64());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // API metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Record an API request outcome.
    pub fn record_api_request(&self, operation: &str, success: bool) {
        counter!("orchestrator_api_requests_total", "operation" => operation.to_string())
            .increment(1);
        if !success {
            counter!("orchestrator_api_failures_total", "operation" => operation.to_string())
                .increment(1);
        }
    }

    /// Record every transition published on `bus` until the bus is dropped.
    pub fn spawn_status_recorder(&self, bus: &StatusBus) -> JoinHandle<()> {
        let mut updates = bus.subscribe_all();
        let metrics = self.clone();

        tokio::spawn(async move {
            let mut in_flight = InFlight::default();
            while let Some(update) = updates.recv().await {
                let was_in_flight = in_flight.track(&update);
                metrics.record_transition(&update, was_in_flight);
            }
        })
    }
}

/// Keys currently between checking and settlement.
#[derive(Debug, Default)]
struct InFlight(HashSet<ActionKey>);

impl InFlight {
    /// Track `update`, returning whether its key was in flight before.
    fn track(&mut self, update: &StatusUpdate) -> bool {
        if update.status.is_in_flight() {
            !self.0.insert(update.key.clone())
        } else {
            self.0.remove(&update.key)
        }
    }
}

/// Install the Prometheus metrics exporter and start the HTTP server.
///
/// Returns an error if the server fails to bind to the specified port.
pub fn install_prometheus_exporter(port: u16) -> eyre::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| eyre::eyre!("Failed to install Prometheus exporter: {}", e))?;

    Ok(())
}
