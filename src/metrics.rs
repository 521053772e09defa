use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_counter!("triage_reports_submitted_total", "Reports accepted, by route");
        describe_counter!("triage_reports_deferred_total", "Writes deferred to the local backlog, by path");
        describe_counter!("triage_retry_sweeps_total", "Backlog retry sweeps started");
        describe_counter!("triage_delivery_failures_total", "Writes neither delivered nor saved locally, by path");
        describe_counter!("triage_classifier_unavailable_total", "Classifications that produced no result");
        describe_counter!("triage_precondition_blocks_total", "Submissions halted on a precondition, by kind");
        describe_gauge!("triage_backlog_size", "Submissions waiting in the local backlog");
        gauge!("triage_backlog_size").set(0.0);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
