use thiserror::Error;

/// Token validation failures.
///
/// The display strings are the client-facing `detail` messages; internal
/// causes are logged at the HTTP boundary, never returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing or invalid authentication token")]
    MissingToken,

    #[error("Invalid or expired token")]
    MalformedToken,

    #[error("Token algorithm not allowed")]
    AlgorithmNotAllowed,

    #[error("Unable to verify token signature")]
    UnknownKey,

    #[error("Invalid or expired token")]
    BadSignature,

    #[error("Invalid or expired token")]
    Expired,

    #[error("Invalid token audience")]
    WrongAudience,

    #[error("Missing tenant_id claim in token")]
    MissingTenantId,

    #[error("Invalid tenant_id format in token (must be UUID)")]
    MalformedTenantId,

    #[error("Invalid or expired token")]
    Revoked,

    /// JWKS endpoint unreachable after retries.
    #[error("Service temporarily unavailable")]
    JwksUnavailable,

    /// Service-account index unreachable.
    #[error("Service temporarily unavailable")]
    StoreUnavailable,
}

impl AuthError {
    /// Infrastructure failures map to 503; everything else is a 401.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::JwksUnavailable | Self::StoreUnavailable)
    }

    /// Stable name for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedToken => "malformed_token",
            Self::AlgorithmNotAllowed => "algorithm_not_allowed",
            Self::UnknownKey => "unknown_key",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::WrongAudience => "wrong_audience",
            Self::MissingTenantId => "missing_tenant_id",
            Self::MalformedTenantId => "malformed_tenant_id",
            Self::Revoked => "revoked",
            Self::JwksUnavailable => "jwks_unavailable",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}
