use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use gardener_core::config::Config;
use gardener_core::cycle::{CycleOrchestrator, DaemonState};
use gardener_core::types::HealthStatus;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::logging::LogRing;

// ── AppState ─────────────────────────────────────────────────────────────

pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<CycleOrchestrator>,
    pub log_ring: LogRing,
    pub start_time: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/logs", get(logs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthCheck {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl HealthCheck {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            message: message.into(),
        }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            message: message.into(),
        }
    }
}

/// One check per dependency; 200 when everything passes, 503 otherwise.
async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let mut checks = Vec::new();

    let health = state.orchestrator.gateway().service_health();
    checks.push(match health.status {
        HealthStatus::Unavailable => HealthCheck::fail(
            "hosting_api",
            format!("circuit {:?}", health.circuit_state),
        ),
        HealthStatus::Degraded => HealthCheck::pass(
            "hosting_api",
            format!("degraded, {} consecutive failures", health.consecutive_failures),
        ),
        HealthStatus::Healthy => HealthCheck::pass("hosting_api", "ok"),
    });

    let work_dir = &state.config.execution.work_dir;
    checks.push(if std::path::Path::new(work_dir).is_dir() {
        HealthCheck::pass("work_dir", work_dir.clone())
    } else {
        HealthCheck::fail("work_dir", format!("{work_dir} missing"))
    });

    let daemon_state = state.orchestrator.state();
    checks.push(match daemon_state {
        DaemonState::Stopped => HealthCheck::fail("daemon", "stopped"),
        _ => HealthCheck::pass("daemon", format!("{daemon_state:?}").to_lowercase()),
    });

    let all_pass = checks.iter().all(|c| c.status == "pass");
    let code = if all_pass {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(json!({ "checks": checks })))
}

// ── Status ───────────────────────────────────────────────────────────────

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let health = state.orchestrator.gateway().service_health();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_s": state.start_time.elapsed().as_secs(),
        "state": state.orchestrator.state(),
        "repo": format!("{}/{}", state.config.repo.owner, state.config.repo.name),
        "base_branch": state.config.repo.base_branch,
        "dry_run": state.config.daemon.dry_run,
        "service_health": health,
        "last_cycle": state.orchestrator.last_result(),
    }))
}

// ── Logs ─────────────────────────────────────────────────────────────────

/// The ring buffer as a JSON array, oldest first.
async fn logs(State(state): State<Arc<AppState>>) -> Json<Value> {
    let entries: Vec<Value> = state
        .log_ring
        .lock()
        .map(|ring| {
            ring.iter()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect()
        })
        .unwrap_or_default();
    Json(json!({ "entries": entries }))
}
