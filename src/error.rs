// HTTP error envelope for the admission chain
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::auth::AuthError;
use crate::database::ResolveError;

/// Client-facing errors with the platform envelope
/// `{"detail": "<message>"}` plus `"error": "<code>"` for the tenant cases.
///
/// Construction is the single place each failure is logged; `IntoResponse`
/// only renders.
#[derive(Debug)]
pub enum ApiError {
    /// 401 with no usable credential. Carries the `missing_tenant_id` code.
    MissingCredentials,

    /// 401 from token validation; message is the client-safe detail.
    Unauthorized(String),

    /// 401 for unknown and inactive tenants alike, so callers cannot probe
    /// which tenants exist.
    TenantNotResolvable,

    /// 403 from an authorization guard.
    Forbidden(String),

    // 400 Bad Request
    BadRequest(String),

    // 404 Not Found
    NotFound(String),

    // 503 Service Unavailable
    ServiceUnavailable,

    /// 500: a handler asked for tenant context the admission chain never
    /// attached.
    ContextMissing,

    // 500 Internal Server Error
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::TenantNotResolvable => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ContextMissing => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-safe message for the `detail` field.
    pub fn detail(&self) -> String {
        match self {
            ApiError::MissingCredentials => {
                "Missing or invalid authentication token".to_string()
            }
            ApiError::Unauthorized(detail) => detail.clone(),
            ApiError::TenantNotResolvable => "Tenant not found or inactive".to_string(),
            ApiError::Forbidden(detail) => detail.clone(),
            ApiError::BadRequest(detail) => detail.clone(),
            ApiError::NotFound(detail) => detail.clone(),
            ApiError::ServiceUnavailable => "Service temporarily unavailable".to_string(),
            ApiError::ContextMissing => {
                "Tenant context not initialized for this request".to_string()
            }
            ApiError::Internal => "Internal server error".to_string(),
        }
    }

    /// Machine-readable code, present only where the envelope defines one.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            ApiError::MissingCredentials => Some("missing_tenant_id"),
            ApiError::TenantNotResolvable => Some("tenant_not_found_or_inactive"),
            _ => None,
        }
    }

    /// 401s caused by the credential itself advertise the Bearer scheme.
    fn challenge(&self) -> bool {
        matches!(self, ApiError::MissingCredentials | ApiError::Unauthorized(_))
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_unavailable() {
            tracing::error!(code = err.code(), "Token validation unavailable");
            return ApiError::ServiceUnavailable;
        }
        // Only revocation hits are interesting enough for warn; the rest are
        // routine client failures
        match err {
            AuthError::Revoked => {}
            _ => tracing::debug!(code = err.code(), "Token validation failed"),
        }
        match err {
            AuthError::MissingToken => ApiError::MissingCredentials,
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidTenantId
            | ResolveError::TenantNotFound
            | ResolveError::TenantInactive => {
                tracing::debug!(error = %err, "Tenant not resolvable");
                ApiError::TenantNotResolvable
            }
            ResolveError::ConnectionTestFailed => {
                tracing::error!("Tenant engine unavailable");
                ApiError::ServiceUnavailable
            }
            ResolveError::ControlPlane(e) => {
                tracing::error!(error = %e, "Control-plane read failed");
                ApiError::ServiceUnavailable
            }
            ResolveError::Decrypt(e) => {
                // The opaque message is all that may be recorded
                tracing::error!(error = %e, "Connection-string decryption failed");
                ApiError::Internal
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.detail())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "detail": self.detail() });
        if let Some(code) = self.error_code() {
            body["error"] = json!(code);
        }

        let mut response = (self.status_code(), Json(body)).into_response();
        if self.challenge() {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, "Bearer".parse().unwrap());
        }
        response
    }
}
