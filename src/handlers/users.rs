use axum::response::Json;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::TenantDb;

#[derive(Debug, serde::Serialize, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// GET /api/v1/users - list users in the tenant database.
pub async fn user_list(TenantDb(db): TenantDb) -> Result<Json<Value>, ApiError> {
    let users = sqlx::query_as::<_, UserRow>(
        "SELECT id, email, role, created_at FROM users ORDER BY created_at DESC LIMIT 100",
    )
    .fetch_all(&db)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Tenant database query failed");
        ApiError::Internal
    })?;

    Ok(Json(json!({ "users": users })))
}
