use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::time::Instant;
use tracing::info;

use crate::auth::extract::bearer_token;
use crate::error::ApiError;
use crate::state::AppState;

use super::context::{AuthzMemo, RequestContext};

/// Admission chain for every request under the API prefix: extract the
/// bearer credential, validate it to claims, resolve the tenant engine, and
/// attach the tenant-scoped context. Paths outside the prefix (health, root)
/// bypass the chain entirely.
pub async fn admission_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !path.starts_with(&state.config.api_path_prefix) {
        return next.run(request).await;
    }

    let started = Instant::now();

    let Some(token) = bearer_token(request.headers()) else {
        return ApiError::MissingCredentials.into_response();
    };

    let claims = match state.validator.validate(&token).await {
        Ok(claims) => claims,
        Err(e) => return ApiError::from(e).into_response(),
    };

    // Canonical string form; the resolver re-parses it as defense in depth
    let tenant_id = claims.tenant_id.to_string();

    let resolved = match state.resolver.resolve(&tenant_id).await {
        Ok(resolved) => resolved,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let cache_hit = resolved.cache_hit;

    request.extensions_mut().insert(RequestContext {
        db: resolved.db,
        tenant_id: tenant_id.clone(),
        claims,
        memo: AuthzMemo::default(),
    });

    let response = next.run(request).await;

    info!(
        tenant_id = %tenant_id,
        path = %path,
        elapsed_ms = started.elapsed().as_millis() as u64,
        cache_hit,
        status = response.status().as_u16(),
        "Request admitted"
    );

    response
}
