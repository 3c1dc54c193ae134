use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

/// One row of `service_account_tokens`. The secret itself is never stored;
/// only its SHA-256 hex digest.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct ServiceAccountToken {
    pub token_id: Uuid,
    pub tenant_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub name: String,
    pub role: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
}

/// Read side of the revocation check, seamed out so the validator can be
/// exercised without a live control plane.
#[async_trait]
pub trait RevocationIndex: Send + Sync {
    async fn find_by_hash(&self, token_hash: &str)
        -> Result<Option<ServiceAccountToken>, sqlx::Error>;

    /// Record a use of the token. At-least-once, may lag the response.
    fn touch_last_used(&self, token_hash: &str);
}

/// SHA-256 hex digest of a raw bearer token, the index key for the
/// service-account precheck.
pub fn hash_token(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

/// Generate a fresh service-account secret. Returned to the caller exactly
/// once at creation.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("car_sa_{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Control-plane store for service-account tokens.
#[derive(Clone)]
pub struct ServiceAccountTokenStore {
    pool: PgPool,
}

impl ServiceAccountTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ServiceAccountToken>, sqlx::Error> {
        sqlx::query_as::<_, ServiceAccountToken>(
            r#"
            SELECT token_id, tenant_id, token_hash, name, role, created_by,
                   created_at, last_used, revoked_at, is_revoked
            FROM service_account_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn update_last_used(&self, token_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE service_account_tokens SET last_used = now() WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a token record for a freshly issued secret.
    pub async fn insert(
        &self,
        tenant_id: Uuid,
        token_hash: &str,
        name: &str,
        role: &str,
        created_by: &str,
    ) -> Result<ServiceAccountToken, sqlx::Error> {
        sqlx::query_as::<_, ServiceAccountToken>(
            r#"
            INSERT INTO service_account_tokens
                (token_id, tenant_id, token_hash, name, role, created_by, created_at, is_revoked)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, now(), false)
            RETURNING token_id, tenant_id, token_hash, name, role, created_by,
                      created_at, last_used, revoked_at, is_revoked
            "#,
        )
        .bind(tenant_id)
        .bind(token_hash)
        .bind(name)
        .bind(role)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<ServiceAccountToken>, sqlx::Error> {
        sqlx::query_as::<_, ServiceAccountToken>(
            r#"
            SELECT token_id, tenant_id, token_hash, name, role, created_by,
                   created_at, last_used, revoked_at, is_revoked
            FROM service_account_tokens
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Revoke a token. `is_revoked` is a latch: the predicate never flips a
    /// revoked token back, and revoking twice is a no-op.
    pub async fn revoke(&self, token_id: Uuid, tenant_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE service_account_tokens
            SET is_revoked = true, revoked_at = now()
            WHERE token_id = $1 AND tenant_id = $2 AND is_revoked = false
            "#,
        )
        .bind(token_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RevocationIndex for ServiceAccountTokenStore {
    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ServiceAccountToken>, sqlx::Error> {
        ServiceAccountTokenStore::find_by_hash(self, token_hash).await
    }

    fn touch_last_used(&self, token_hash: &str) {
        let store = self.clone();
        let token_hash = token_hash.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.update_last_used(&token_hash).await {
                debug!(error = %e, "Failed to update service-account last_used");
            }
        });
    }
}
