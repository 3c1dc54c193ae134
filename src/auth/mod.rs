use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub mod error;
pub mod extract;
pub mod jwks;
pub mod roles;
pub mod service_account;
pub mod validator;

pub use error::AuthError;
pub use roles::{Permission, Role};
pub use validator::TokenValidator;

/// URL namespace for custom JWT claims.
pub const CLAIM_NAMESPACE: &str = "https://car.platform/";
pub const TENANT_ID_CLAIM: &str = "https://car.platform/tenant_id";
pub const ROLES_CLAIM: &str = "https://car.platform/roles";

/// How the bearer credential was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Jwt,
    ServiceAccount,
}

/// Authenticated identity of one request.
///
/// Constructed only by the token validator; a `Claims` always carries a
/// non-nil tenant id. Lives for the duration of the request.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub subject: String,
    pub tenant_id: Uuid,
    /// Role names, normalized to lowercase. May contain names outside the
    /// closed [`Role`] set; those grant no permissions.
    pub roles: BTreeSet<String>,
    pub audience: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_kind: TokenKind,
}

impl Claims {
    /// Case-insensitive role membership check.
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.contains(&name.to_ascii_lowercase())
    }

    /// Roles as a sorted list, for audit records and responses.
    pub fn roles_presented(&self) -> Vec<String> {
        self.roles.iter().cloned().collect()
    }
}
