use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::service_account::{generate_secret, hash_token};
use crate::auth::Role;
use crate::error::ApiError;
use crate::middleware::CurrentClaims;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    pub role: String,
}

/// POST /api/v1/admin/service-accounts - issue a service-account token.
///
/// The secret appears in this response and nowhere else; only its hash is
/// stored.
pub async fn token_create(
    State(state): State<AppState>,
    CurrentClaims(claims): CurrentClaims,
    Json(request): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let role = Role::parse(&request.role).ok_or_else(|| {
        ApiError::BadRequest("role must be one of admin, analyst, viewer, ingestion".to_string())
    })?;
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let secret = generate_secret();
    let record = state
        .service_accounts
        .insert(
            claims.tenant_id,
            &hash_token(&secret),
            request.name.trim(),
            role.as_str(),
            &claims.subject,
        )
        .await
        .map_err(store_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": secret,
            "service_account": record,
        })),
    ))
}

/// GET /api/v1/admin/service-accounts - list tokens for the tenant.
pub async fn token_list(
    State(state): State<AppState>,
    CurrentClaims(claims): CurrentClaims,
) -> Result<Json<Value>, ApiError> {
    let records = state
        .service_accounts
        .list_by_tenant(claims.tenant_id)
        .await
        .map_err(store_error)?;

    Ok(Json(json!({ "service_accounts": records })))
}

/// POST /api/v1/admin/service-accounts/:id/revoke - revoke a token.
///
/// Revocation is a latch; revoking an already-revoked token reports not
/// found rather than flipping any state.
pub async fn token_revoke(
    State(state): State<AppState>,
    CurrentClaims(claims): CurrentClaims,
    Path(token_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let revoked = state
        .service_accounts
        .revoke(token_id, claims.tenant_id)
        .await
        .map_err(store_error)?;

    if !revoked {
        return Err(ApiError::NotFound(format!(
            "Service-account token not found: {token_id}"
        )));
    }
    Ok(Json(json!({ "revoked": token_id })))
}

fn store_error(e: sqlx::Error) -> ApiError {
    tracing::error!(error = %e, "Service-account store query failed");
    ApiError::Internal
}
