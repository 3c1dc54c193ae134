use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::{CurrentClaims, TenantDb};

#[derive(Debug, serde::Serialize, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub filename: String,
    pub status: String,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
}

/// GET /api/v1/documents - list documents in the tenant database.
pub async fn document_list(TenantDb(db): TenantDb) -> Result<Json<Value>, ApiError> {
    let documents = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT id, filename, status, uploaded_by, created_at
        FROM documents
        ORDER BY created_at DESC
        LIMIT 100
        "#,
    )
    .fetch_all(&db)
    .await
    .map_err(tenant_db_error)?;

    Ok(Json(json!({ "documents": documents })))
}

/// POST /api/v1/documents/upload - register a document for ingestion.
pub async fn document_upload(
    TenantDb(db): TenantDb,
    CurrentClaims(claims): CurrentClaims,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("filename must not be empty".to_string()));
    }

    let document = sqlx::query_as::<_, DocumentRow>(
        r#"
        INSERT INTO documents (id, filename, status, uploaded_by, created_at)
        VALUES (gen_random_uuid(), $1, 'pending', $2, now())
        RETURNING id, filename, status, uploaded_by, created_at
        "#,
    )
    .bind(request.filename.trim())
    .bind(&claims.subject)
    .fetch_one(&db)
    .await
    .map_err(tenant_db_error)?;

    Ok((StatusCode::CREATED, Json(json!({ "document": document }))))
}

/// DELETE /api/v1/documents/:id
pub async fn document_delete(
    TenantDb(db): TenantDb,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let result = sqlx::query("DELETE FROM documents WHERE id = $1")
        .bind(id)
        .execute(&db)
        .await
        .map_err(tenant_db_error)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("Document not found: {id}")));
    }
    Ok(Json(json!({ "deleted": id })))
}

/// Tenant-database failures stay generic toward the client.
fn tenant_db_error(e: sqlx::Error) -> ApiError {
    tracing::error!(error = %e, "Tenant database query failed");
    ApiError::Internal
}
