use axum::extract::State;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe the job metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

pub fn describe_metrics() {
    metrics::describe_counter!("simulation_jobs_total", "Simulation jobs submitted");
    metrics::describe_counter!("simulation_jobs_completed", "Simulation jobs completed");
    metrics::describe_counter!("simulation_jobs_failed", "Simulation jobs that failed");
    metrics::describe_histogram!(
        "simulation_processing_seconds",
        metrics::Unit::Seconds,
        "Time from pickup to completion of a simulation job"
    );
    metrics::describe_gauge!("simulation_queue_depth", "Jobs waiting in the queue");
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
