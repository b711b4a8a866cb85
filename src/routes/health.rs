use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u64>,
}

impl ComponentHealth {
    fn ok(started: Instant) -> Self {
        Self {
            status: "ok",
            latency_ms: Some(started.elapsed().as_millis() as u64),
            queue_depth: None,
        }
    }

    fn error() -> Self {
        Self {
            status: "error",
            latency_ms: None,
            queue_depth: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: database and Redis reachability. Also refreshes the
/// queue depth gauge.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_start = Instant::now();
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth::ok(db_start),
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            ComponentHealth::error()
        }
    };

    let redis_start = Instant::now();
    let redis = match state.queue.health_check().await {
        Ok(()) => {
            let mut check = ComponentHealth::ok(redis_start);
            if let Ok(depth) = state.queue.queue_depth().await {
                metrics::gauge!("simulation_queue_depth").set(depth as f64);
                check.queue_depth = Some(depth);
            }
            check
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis health check failed");
            ComponentHealth::error()
        }
    };

    let healthy = database.is_ok() && redis.is_ok();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            checks: HealthChecks { database, redis },
        }),
    )
}
