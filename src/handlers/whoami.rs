use axum::response::Json;
use serde_json::{json, Value};

use crate::middleware::{CurrentClaims, TenantId};

/// GET /api/v1/auth/whoami - echo the authenticated identity.
pub async fn whoami_get(TenantId(tenant_id): TenantId, CurrentClaims(claims): CurrentClaims) -> Json<Value> {
    Json(json!({
        "subject": claims.subject,
        "tenant_id": tenant_id,
        "roles": claims.roles_presented(),
        "token_kind": claims.token_kind,
        "expires_at": claims.expires_at,
    }))
}
