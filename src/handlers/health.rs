use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET / - service identity. Outside the API prefix, no authentication.
pub async fn root_get() -> Json<Value> {
    Json(json!({
        "name": "car-platform-api",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Tenant-aware request admission and routing core",
    }))
}

/// GET /health - liveness plus resolver cache statistics.
pub async fn health_get(State(state): State<AppState>) -> Json<Value> {
    let control_plane_ok = state.control_plane.ping().await.is_ok();
    let cache = state.resolver.stats().await;

    Json(json!({
        "status": if control_plane_ok { "ok" } else { "degraded" },
        "control_plane": control_plane_ok,
        "tenant_cache": cache,
        "timestamp": chrono::Utc::now(),
    }))
}
