use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::ApiError;

/// Tenant-scoped state attached to each admitted request.
#[derive(Clone)]
pub struct RequestContext {
    pub db: PgPool,
    /// Canonical hyphenated form of `claims.tenant_id`.
    pub tenant_id: String,
    pub claims: Claims,
    pub memo: AuthzMemo,
}

/// Memo key for one authorization decision within a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    pub tenant_id: Uuid,
    pub subject: String,
    pub roles_hash: u64,
    pub requirement: String,
}

/// Stable digest of the presented role set for memo keys.
pub fn roles_hash(roles: &BTreeSet<String>) -> u64 {
    let mut hasher = DefaultHasher::new();
    for role in roles {
        role.hash(&mut hasher);
    }
    hasher.finish()
}

/// Per-request authorization memo.
///
/// Not a cache: it is created when the request is admitted and dropped with
/// the request, so a decision never outlives the claims it was made against.
#[derive(Clone, Default)]
pub struct AuthzMemo(Arc<Mutex<HashMap<MemoKey, bool>>>);

impl AuthzMemo {
    pub fn get(&self, key: &MemoKey) -> Option<bool> {
        self.0.lock().ok().and_then(|memo| memo.get(key).copied())
    }

    pub fn put(&self, key: MemoKey, allowed: bool) {
        if let Ok(mut memo) = self.0.lock() {
            memo.insert(key, allowed);
        }
    }
}

/// Tenant database handle for the current request.
pub struct TenantDb(pub PgPool);

/// Canonical tenant id string for the current request.
pub struct TenantId(pub String);

/// Authenticated claims for the current request.
pub struct CurrentClaims(pub Claims);

fn context_of(parts: &Parts) -> Result<&RequestContext, ApiError> {
    parts
        .extensions
        .get::<RequestContext>()
        .ok_or(ApiError::ContextMissing)
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TenantDb {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(TenantDb(context_of(parts)?.db.clone()))
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TenantId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(TenantId(context_of(parts)?.tenant_id.clone()))
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentClaims {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentClaims(context_of(parts)?.claims.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_hash_is_order_stable() {
        let a: BTreeSet<String> = ["admin", "viewer"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["viewer", "admin"].iter().map(|s| s.to_string()).collect();
        assert_eq!(roles_hash(&a), roles_hash(&b));

        let c: BTreeSet<String> = ["admin"].iter().map(|s| s.to_string()).collect();
        assert_ne!(roles_hash(&a), roles_hash(&c));
    }

    #[test]
    fn memo_round_trip() {
        let memo = AuthzMemo::default();
        let key = MemoKey {
            tenant_id: Uuid::nil(),
            subject: "user-1".to_string(),
            roles_hash: 42,
            requirement: "permission:upload_document".to_string(),
        };

        assert_eq!(memo.get(&key), None);
        memo.put(key.clone(), false);
        assert_eq!(memo.get(&key), Some(false));

        let other = MemoKey {
            requirement: "role:admin".to_string(),
            ..key
        };
        assert_eq!(memo.get(&other), None);
    }
}
