use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CacheInvalidateRequest {
    /// Evict one tenant; omitted means evict everything.
    pub tenant_id: Option<Uuid>,
}

/// POST /api/v1/admin/cache/invalidate - evict resolver cache entries.
///
/// Engines held by in-flight requests stay alive until those requests
/// finish; eviction only forces the next resolution through the control
/// plane.
pub async fn cache_invalidate(
    State(state): State<AppState>,
    Json(request): Json<CacheInvalidateRequest>,
) -> Json<Value> {
    match request.tenant_id {
        Some(tenant_id) => {
            let evicted = state.resolver.invalidate(tenant_id).await;
            Json(json!({ "evicted": if evicted { 1 } else { 0 }, "tenant_id": tenant_id }))
        }
        None => {
            let evicted = state.resolver.invalidate_all().await;
            Json(json!({ "evicted": evicted }))
        }
    }
}
